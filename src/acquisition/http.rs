//! Streaming HTTP fetch

use crate::error::{AcquisitionError, Result};
use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::trace;

/// Stream the body of `url` into `path`
///
/// The body is written as it arrives; the status is checked once the stream
/// completes and a non-success status is reported as an error. The caller removes
/// the file on error.
pub(super) async fn stream_to_file(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    let response = client.get(url).send().await?;
    let status = response.status();

    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let data = chunk?;
        file.write_all(&data).await?;
        written += data.len() as u64;
    }
    file.flush().await?;
    trace!(url, bytes = written, "body streamed");

    if !status.is_success() {
        return Err(AcquisitionError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }
        .into());
    }

    Ok(())
}
