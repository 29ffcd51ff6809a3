//! Byte-range planning
//!
//! Splits a known file size into contiguous, non-overlapping part ranges
//! aligned to a block boundary. Interior part ends grow to the next
//! boundary but are clamped to the next part's start, so the parts always
//! form an exact partition of `[0, file_size)`.

use crate::model::record::PartProgress;

/// Block boundary interior part ends are aligned to
pub const ALIGN_BOUNDARY: u64 = 4096;

/// Inclusive-end alignment: smallest `k*boundary - 1 >= x`.
pub fn align_up(x: u64, boundary: u64) -> u64 {
    debug_assert!(boundary > 0);
    ((x / boundary) + 1) * boundary - 1
}

/// Plan part ranges for a file of `file_size` bytes across `thread_count`
/// workers.
///
/// Unknown or empty sizes (`file_size <= 0`) collapse to a single
/// open-ended part with `chunk_size = 0`; a size smaller than the thread
/// count collapses to one part as well.
pub fn plan_parts(file_size: i64, thread_count: usize) -> Vec<PartProgress> {
    if file_size <= 0 {
        return vec![PartProgress::default()];
    }

    let size = file_size as u64;
    let mut n = thread_count.max(1) as u64;
    if size / n == 0 {
        n = 1;
    }
    let base = size / n;

    let mut parts = Vec::with_capacity(n as usize);
    for i in 0..n {
        let start = i * base;
        let end = if i == n - 1 {
            size - 1
        } else {
            let aligned = align_up(start + base - 1, ALIGN_BOUNDARY);
            aligned.min((i + 1) * base - 1)
        };
        parts.push(PartProgress {
            start_byte: start,
            end_byte: end,
            chunk_size: end - start + 1,
            downloaded_byte: 0,
            percent: 0,
            extra: Default::default(),
        });
    }
    parts
}

/// HTTP Range header value for a part, honoring resume offset.
///
/// `open_ended` requests `bytes=<pos>-` (single-thread or servers without
/// multipart); otherwise the bounded `bytes=<pos>-<end>` form is used.
pub fn range_header(part: &PartProgress, open_ended: bool) -> String {
    let pos = part.start_byte + part.downloaded_byte;
    if open_ended {
        format!("bytes={}-", pos)
    } else {
        format!("bytes={}-{}", pos, part.end_byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(parts: &[PartProgress], file_size: u64) {
        assert_eq!(parts[0].start_byte, 0);
        assert_eq!(parts.last().unwrap().end_byte, file_size - 1);
        for pair in parts.windows(2) {
            assert_eq!(pair[1].start_byte, pair[0].end_byte + 1, "parts must be contiguous");
        }
        let total: u64 = parts.iter().map(|p| p.chunk_size).sum();
        assert_eq!(total, file_size);
    }

    #[test]
    fn four_even_parts() {
        let parts = plan_parts(4096, 4);
        assert_eq!(parts.len(), 4);
        let bounds: Vec<(u64, u64)> = parts.iter().map(|p| (p.start_byte, p.end_byte)).collect();
        assert_eq!(bounds, vec![(0, 1023), (1024, 2047), (2048, 3071), (3072, 4095)]);
        assert_partition(&parts, 4096);
    }

    #[test]
    fn small_base_stays_contiguous() {
        // base (1666) below the boundary: alignment would overshoot the
        // next start and is clamped
        let parts = plan_parts(5000, 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].start_byte, 0);
        assert_eq!(parts[1].start_byte, 1666);
        assert_eq!(parts[2].start_byte, 3332);
        assert_partition(&parts, 5000);
    }

    #[test]
    fn unaligned_base_clamped_to_next_start() {
        // base 2500 is off-boundary: alignment overshoots and the clamp
        // keeps the partition exact
        let parts = plan_parts(10_000, 4);
        assert_eq!(parts[0].end_byte, 2499);
        assert_partition(&parts, 10_000);

        let parts = plan_parts(1_048_576, 4);
        assert_eq!(parts[0].end_byte, 262_143); // 64 * 4096 - 1
        assert_partition(&parts, 1_048_576);
    }

    #[test]
    fn tiny_file_collapses_to_single_part() {
        let parts = plan_parts(1, 4);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].start_byte, 0);
        assert_eq!(parts[0].end_byte, 0);
        assert_eq!(parts[0].chunk_size, 1);
    }

    #[test]
    fn unknown_size_single_open_part() {
        let parts = plan_parts(-1, 4);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].chunk_size, 0);
        assert_eq!(range_header(&parts[0], true), "bytes=0-");
    }

    #[test]
    fn align_up_values() {
        assert_eq!(align_up(0, 4096), 4095);
        assert_eq!(align_up(1665, 4096), 4095);
        assert_eq!(align_up(4095, 4096), 4095);
        assert_eq!(align_up(4096, 4096), 8191);
    }

    #[test]
    fn range_header_resume_offset() {
        let part = PartProgress {
            start_byte: 1024,
            end_byte: 2047,
            chunk_size: 1024,
            downloaded_byte: 100,
            ..Default::default()
        };
        assert_eq!(range_header(&part, false), "bytes=1124-2047");
        assert_eq!(range_header(&part, true), "bytes=1124-");
    }
}
