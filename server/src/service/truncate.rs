//! Output bounding
//!
//! Cuts captured command output down to a line and byte budget and renders the
//! `<bash_metadata>` block that annotates tool output with non-fatal conditions
//! (timeouts, truncation). Everything here is pure.

const METADATA_OPEN: &str = "<bash_metadata>";
const METADATA_CLOSE: &str = "</bash_metadata>";

/// Bound `output` to at most `max_lines` lines and `max_bytes` bytes.
///
/// Returns the kept prefix followed by a trailer describing what was dropped,
/// and whether anything was dropped at all. Each line is charged its newline
/// terminator. A first line that alone exceeds `max_bytes` is cut at the last
/// UTF-8 boundary that fits rather than dropped entirely.
pub fn truncate_output(output: &str, max_lines: usize, max_bytes: usize) -> (String, bool) {
    let total_lines = count_lines(output);
    if output.len() <= max_bytes && total_lines <= max_lines {
        return (output.to_string(), false);
    }

    let mut kept_bytes = 0;
    let mut kept_lines = 0;
    for line in output.split_inclusive('\n') {
        if kept_lines >= max_lines || kept_bytes + line.len() > max_bytes {
            break;
        }
        kept_bytes += line.len();
        kept_lines += 1;
    }

    if kept_lines == 0 && max_lines > 0 {
        kept_bytes = floor_char_boundary(output, max_bytes);
        if kept_bytes > 0 {
            kept_lines = 1;
        }
    }

    let kept = &output[..kept_bytes];
    let trailer = truncation_trailer(
        total_lines.saturating_sub(kept_lines),
        output.len() - kept_bytes,
    );

    let mut result = String::with_capacity(kept.len() + trailer.len() + 1);
    result.push_str(kept);
    if !kept.is_empty() && !kept.ends_with('\n') {
        result.push('\n');
    }
    result.push_str(&trailer);

    (result, true)
}

/// Trailer appended after a truncated prefix
pub fn truncation_trailer(dropped_lines: usize, dropped_bytes: usize) -> String {
    format!(
        "\n...{} lines ({} bytes) truncated...\n\n\
         Use Grep to search the full content or Read with offset/limit to view specific sections.",
        dropped_lines, dropped_bytes
    )
}

/// Number of lines, where a trailing newline does not start a new one
pub fn count_lines(s: &str) -> usize {
    s.split_inclusive('\n').count()
}

/// Render diagnostic lines as a delimited metadata block
pub fn format_metadata<S: AsRef<str>>(lines: &[S]) -> String {
    let mut result = String::from(METADATA_OPEN);
    result.push('\n');
    for line in lines {
        result.push_str(line.as_ref());
        result.push('\n');
    }
    result.push_str(METADATA_CLOSE);
    result
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
