// Progress-tracked streaming of a finished file to the transport

pub mod progress;

pub use progress::{
    render_upload_progress, ProgressReader, ProgressReporter, UploadProgress, UploadStream,
    REPORT_INTERVAL,
};
