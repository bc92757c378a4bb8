//! Byte-level frame previews for `trace_frames` mode.

use tracing::debug;

pub const PREVIEW_BYTES: usize = 32;

pub fn hex_preview(data: &[u8], max: usize) -> String {
    let take = data.len().min(max);
    let mut out = data.iter().take(take).map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ");
    if data.len() > max {
        out.push_str("...");
    }
    out
}

/// Printable ASCII kept, everything else shown as `.`.
pub fn ascii_preview(data: &[u8], max: usize) -> String {
    let take = data.len().min(max);
    let mut out: String = data
        .iter()
        .take(take)
        .map(|&b| if (32..=126).contains(&b) { b as char } else { '.' })
        .collect();
    if data.len() > max {
        out.push_str("...");
    }
    out
}

/// Logs one raw frame. Password frames never get a preview.
pub(crate) fn trace_frame(kind: &str, frame: &[u8], redact: bool) {
    if redact {
        debug!(target: "pgwire", kind, len = frame.len(), "frame (payload redacted)");
        return;
    }
    debug!(
        target: "pgwire",
        kind,
        len = frame.len(),
        hex = %hex_preview(frame, PREVIEW_BYTES),
        ascii = %ascii_preview(frame, PREVIEW_BYTES),
        "frame"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previews_short_frames() {
        let data = b"Q\x00\x00\x00\x0dSELECT 1\x00";
        assert_eq!(hex_preview(&data[..5], PREVIEW_BYTES), "51 00 00 00 0d");
        assert_eq!(ascii_preview(data, PREVIEW_BYTES), "Q....SELECT 1.");
    }

    #[test]
    fn previews_are_truncated() {
        let data = vec![b'a'; 40];
        let hex = hex_preview(&data, 4);
        assert_eq!(hex, "61 61 61 61...");
        assert_eq!(ascii_preview(&data, 4), "aaaa...");
        assert_eq!(hex_preview(&[], 4), "");
    }
}
