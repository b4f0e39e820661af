//! libcurl-backed transport: one easy handle per fetch.

use super::{CurlOptions, Transport};
use crate::error::NetworkFailure;
use std::sync::atomic::{AtomicBool, Ordering};

const MAX_REDIRECTS: u32 = 10;

/// Plain GET over libcurl. Redirects are followed; any final status outside
/// 2xx is a failure.
#[derive(Debug, Clone, Default)]
pub struct CurlTransport {
    options: CurlOptions,
}

impl CurlTransport {
    pub fn new(options: CurlOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CurlOptions {
        &self.options
    }

    fn configure(&self, easy: &mut curl::easy::Easy, url: &str) -> Result<(), curl::Error> {
        easy.url(url)?;
        easy.follow_location(true)?;
        easy.max_redirections(MAX_REDIRECTS)?;
        easy.connect_timeout(self.options.connect_timeout)?;
        easy.low_speed_limit(self.options.low_speed_limit)?;
        easy.low_speed_time(self.options.low_speed_time)?;
        if let Some(timeout) = self.options.timeout {
            easy.timeout(timeout)?;
        }
        if let Some(ref agent) = self.options.user_agent {
            easy.useragent(agent)?;
        }
        // Needed for the progress callback, which is how an idle transfer notices cancellation.
        easy.progress(true)?;
        Ok(())
    }
}

impl Transport for CurlTransport {
    fn fetch(
        &self,
        url: &str,
        cancel: &AtomicBool,
        on_chunk: &mut dyn FnMut(&[u8]),
    ) -> Result<(), NetworkFailure> {
        let mut easy = curl::easy::Easy::new();
        self.configure(&mut easy, url).map_err(classify_curl_error)?;

        let performed = {
            let mut transfer = easy.transfer();
            transfer
                .write_function(|data| {
                    if cancel.load(Ordering::Relaxed) {
                        return Ok(0);
                    }
                    on_chunk(data);
                    Ok(data.len())
                })
                .map_err(classify_curl_error)?;
            transfer
                .progress_function(|_, _, _, _| !cancel.load(Ordering::Relaxed))
                .map_err(classify_curl_error)?;
            transfer.perform()
        };

        if cancel.load(Ordering::Relaxed) {
            return Err(NetworkFailure::Aborted);
        }
        performed.map_err(classify_curl_error)?;

        let code = easy.response_code().map_err(classify_curl_error)?;
        if !(200..300).contains(&code) {
            tracing::debug!(url, code, "non-success status");
            return Err(NetworkFailure::Http(code));
        }
        Ok(())
    }
}

/// Map a curl error onto the network failure taxonomy.
pub fn classify_curl_error(e: curl::Error) -> NetworkFailure {
    let detail = e.to_string();
    if e.is_operation_timedout() {
        return NetworkFailure::Timeout(detail);
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return NetworkFailure::Connection(detail);
    }
    if e.is_aborted_by_callback() || e.is_write_error() {
        return NetworkFailure::Aborted;
    }
    NetworkFailure::Transfer(detail)
}
