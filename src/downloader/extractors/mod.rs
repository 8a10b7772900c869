// Extraction backends and the failure classifier they feed
//
// yt-dlp is the only backend; the `ExtractionClient` trait keeps the
// acquisition controller independent of it.

mod diagnostics;
mod ytdlp;

pub use diagnostics::{classify_failure, FailureKind};
pub use ytdlp::YtDlpClient;
