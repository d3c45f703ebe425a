//! Output-path templating.
//!
//! Sink paths given on the command line may contain placeholder tokens that
//! are expanded once, before any sink opens:
//!
//! - `$time`: `HH_MM_SS` of the expansion moment
//! - `$date`: `dd-mm-yyyy` of the expansion moment
//! - `$image`: file name of the debugged image
//! - `$hostname`: name of this machine
//! - `$username`: user running the debugger
//! - `$random`: a number in `0..1_000_000`

use chrono::Local;
use rand::Rng;

/// Expand all placeholder tokens in `input`.
///
/// `image` is the full path of the debugged image; only its file name is
/// substituted.
#[must_use]
pub fn expand(input: &str, image: &str) -> String
{
    let mut out = input.to_string();
    if !out.contains('$') {
        return out;
    }

    let now = Local::now();
    if out.contains("$time") {
        out = out.replace("$time", &now.format("%H_%M_%S").to_string());
    }
    if out.contains("$date") {
        out = out.replace("$date", &now.format("%d-%m-%Y").to_string());
    }
    if out.contains("$image") {
        let name = std::path::Path::new(image)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        out = out.replace("$image", &name);
    }
    if out.contains("$hostname") {
        out = out.replace("$hostname", &host_name());
    }
    if out.contains("$username") {
        out = out.replace("$username", &user_name());
    }
    if out.contains("$random") {
        let value: u64 = rand::thread_rng().gen_range(0..1_000_000);
        out = out.replace("$random", &value.to_string());
    }
    out
}

fn host_name() -> String
{
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

fn user_name() -> String
{
    std::env::var("USERNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_plain_paths_untouched()
    {
        assert_eq!(expand("C:\\logs\\out.hind", "C:\\app\\a.exe"), "C:\\logs\\out.hind");
    }

    #[test]
    fn test_image_token()
    {
        let expanded = expand("crash-$image.hind", "C:\\app\\server.exe");
        assert_eq!(expanded, "crash-server.exe.hind");
    }

    #[test]
    fn test_random_token_is_numeric()
    {
        let expanded = expand("$random.hind", "a.exe");
        let stem = expanded.strip_suffix(".hind").unwrap();
        assert!(stem.parse::<u64>().is_ok());
    }
}
