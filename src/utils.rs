use std::str::FromStr;
use std::time::Duration;

use ethers::types::Address;
use tokio::time::sleep;
use tracing::debug;

/// Runs `operation` until it succeeds, up to `max_retries` extra attempts.
///
/// `should_retry` decides whether an error is worth another attempt; errors it
/// rejects are returned immediately.
pub async fn retry_async<F, Fut, T, E, P>(
    mut operation: F,
    max_retries: u32,
    base_delay: Duration,
    exponential: bool,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_retries && should_retry(&e) => {
                let delay = if exponential {
                    base_delay * 2u32.pow(attempt)
                } else {
                    base_delay
                };
                debug!(attempt = attempt + 1, ?delay, "retrying");
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Shortens an address for display: `0x1234...abcd`.
pub fn format_address(address: &Address) -> String {
    let full = format!("{:#x}", address);
    format!("{}...{}", &full[..6], &full[full.len() - 4..])
}

/// Parses a `0x`-prefixed 40-hex-digit address, rejecting anything else.
pub fn parse_address(input: &str) -> Option<Address> {
    let input = input.trim();
    let hex_part = input.strip_prefix("0x")?;
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Address::from_str(input).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, &str> = retry_async(
            move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err("flaky") } else { Ok(n) }
            },
            3,
            Duration::from_millis(1),
            true,
            |_| true,
        )
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_fatal_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), &str> = retry_async(
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("fatal")
            },
            3,
            Duration::from_millis(1),
            false,
            |e| *e != "fatal",
        )
        .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_format_address() {
        let address = parse_address("0x1234567890abcdef1234567890abcdef1234abcd").unwrap();
        assert_eq!(format_address(&address), "0x1234...abcd");
    }

    #[test]
    fn test_parse_address() {
        assert!(parse_address("0x1234567890AbCdEf1234567890abcdef1234abcd").is_some());
        assert!(parse_address("1234567890abcdef1234567890abcdef1234abcd").is_none());
        assert!(parse_address("0x1234").is_none());
        assert!(parse_address("0xzz34567890abcdef1234567890abcdef1234abcd").is_none());
    }
}
