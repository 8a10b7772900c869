// Downloader module - acquisition of media files from YouTube links

pub mod acquisition;
pub mod credentials;
pub mod errors;
pub mod extractors;
pub mod models;
pub mod tools;
pub mod traits;
pub mod utils;

pub use acquisition::AcquisitionController;
pub use credentials::{CredentialHandle, CredentialProvider, CredentialSource};
pub use errors::{AcquisitionError, ExtractionFailure, InvalidRequest, StatusError, TransportError};
pub use extractors::{classify_failure, FailureKind, YtDlpClient};
pub use models::{AcquiredMedia, AcquisitionRequest, AcquisitionResult, ExtractionStrategy};
pub use traits::{DeliveryTransport, ExtractionClient, StatusSink};
