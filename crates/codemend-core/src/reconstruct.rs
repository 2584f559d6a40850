//! Rebuild a document from an unordered set of overlapping chunks.
//!
//! The inverse of [`chunk::split`](crate::chunk::split). Chunks arrive in
//! no particular order (usually straight from the index store), may
//! contain identical texts, and may be missing pieces.
//!
//! # Algorithm
//!
//! 1. **Start chunk.** A chunk qualifies when no *other* chunk with
//!    different text ends with its first `overlap_size` characters. The
//!    first qualifying chunk in input order wins; if none qualifies the
//!    call fails.
//! 2. **Stitch.** Starting from the start chunk, repeatedly scan the
//!    unused chunks in input order for one the merged text overlaps onto,
//!    append everything after the overlap, and rescan. An overlap spans at
//!    least `overlap_size` characters (or the whole chunk when it is
//!    shorter) and the shortest one is used. Chunks are tracked by
//!    position, so two chunks with the same text are consumed separately.
//! 3. **Duplicates.** Unplaced chunks whose text repeats a placed chunk are
//!    counted as duplicates rather than missing. The same file indexed
//!    twice therefore still rebuilds completely.
//! 4. **Stall.** If a scan finds nothing while other chunks remain, a
//!    bounded backtracking search retries the earlier choices, first over
//!    every chunk and then over distinct texts only. When that also fails
//!    the greedy text is returned and the stall is logged.

use tracing::{debug, warn};

use crate::error::ReconstructionError;

/// Upper bound on chunk placements tried by one backtracking search.
const BACKTRACK_BUDGET: usize = 10_000;

/// Result of a reconstruction, including how much of the input was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconstruction {
    pub content: String,
    /// Number of chunks stitched into `content`.
    pub used: usize,
    /// Chunks left out because their text repeats a chunk already stitched in.
    pub duplicates: usize,
    /// Number of chunks supplied.
    pub total: usize,
}

impl Reconstruction {
    /// Whether every supplied chunk was stitched in or is a repeat of one that was.
    pub fn is_complete(&self) -> bool {
        self.used + self.duplicates == self.total
    }
}

/// Reconstruct a document and return only its text.
///
/// See [`reconstruct_detailed`] for the semantics.
pub fn reconstruct<S: AsRef<str>>(chunks: &[S], overlap_size: usize) -> Result<String, ReconstructionError> {
    reconstruct_detailed(chunks, overlap_size).map(|r| r.content)
}

/// Reconstruct a document from overlapping chunks.
///
/// Zero chunks yield an empty string and a single chunk is returned
/// verbatim. Fails with [`ReconstructionError::NoStartChunk`] when no chunk
/// can be identified as the beginning of the document. A stitch that
/// cannot consume every chunk is not an error; check
/// [`Reconstruction::is_complete`].
pub fn reconstruct_detailed<S: AsRef<str>>(
    chunks: &[S],
    overlap_size: usize,
) -> Result<Reconstruction, ReconstructionError> {
    let total = chunks.len();
    match total {
        0 => {
            return Ok(Reconstruction {
                content: String::new(),
                used: 0,
                duplicates: 0,
                total,
            })
        }
        1 => {
            return Ok(Reconstruction {
                content: chunks[0].as_ref().to_string(),
                used: 1,
                duplicates: 0,
                total,
            })
        }
        _ => {}
    }

    let start = find_start_chunk(chunks, overlap_size).ok_or(ReconstructionError::NoStartChunk {
        chunks: total,
        overlap_size,
    })?;

    let (content, placed) = stitch_greedy(chunks, start, overlap_size);
    let greedy = Reconstruction {
        content,
        used: placed.iter().filter(|&&p| p).count(),
        duplicates: count_repeats(chunks, &placed),
        total,
    };
    if greedy.is_complete() {
        if greedy.duplicates > 0 {
            debug!(duplicates = greedy.duplicates, "skipped chunks repeating stitched text");
        }
        debug!(total, chars = greedy.content.chars().count(), "reconstructed document");
        return Ok(greedy);
    }

    let repeats = later_copies(chunks, start);
    for skip_repeats in [false, true] {
        let mut used = if skip_repeats {
            repeats.clone()
        } else {
            vec![false; total]
        };
        let skipped = used.iter().filter(|&&u| u).count();
        if skip_repeats && skipped == 0 {
            break;
        }
        used[start] = true;
        let mut merged = chunks[start].as_ref().to_string();
        let mut search = Backtrack {
            chunks,
            overlap_size,
            budget: BACKTRACK_BUDGET,
        };
        if search.extend(&mut merged, &mut used, skipped + 1) {
            debug!(total, duplicates = skipped, "reconstructed document after backtracking");
            return Ok(Reconstruction {
                content: merged,
                used: total - skipped,
                duplicates: skipped,
                total,
            });
        }
    }

    warn!(
        used = greedy.used,
        duplicates = greedy.duplicates,
        total,
        "incomplete merge: no remaining chunk continues the document"
    );
    Ok(greedy)
}

/// Index of the chunk that begins the document, if one can be identified.
///
/// A chunk qualifies when no other chunk ends with its first
/// `overlap_size` characters. Chunks with identical text are not compared
/// with each other. Ties go to the first qualifying chunk in input order.
pub fn find_start_chunk<S: AsRef<str>>(chunks: &[S], overlap_size: usize) -> Option<usize> {
    if chunks.len() == 1 {
        return Some(0);
    }
    if overlap_size == 0 {
        return None;
    }
    (0..chunks.len()).find(|&i| {
        let head = chunks[i].as_ref();
        let lead = prefix_chars(head, overlap_size);
        !chunks.iter().enumerate().any(|(j, other)| {
            let other = other.as_ref();
            j != i && other != head && other.ends_with(lead)
        })
    })
}

/// Greedy stitch from `start`. Returns the merged text and which chunks it used.
fn stitch_greedy<S: AsRef<str>>(chunks: &[S], start: usize, overlap_size: usize) -> (String, Vec<bool>) {
    let total = chunks.len();
    let mut used = vec![false; total];
    used[start] = true;
    let mut merged = chunks[start].as_ref().to_string();

    loop {
        let next = (0..total).find_map(|i| {
            if used[i] {
                return None;
            }
            overlap_len(&merged, chunks[i].as_ref(), overlap_size).map(|len| (i, len))
        });
        let Some((i, len)) = next else {
            break;
        };
        merged.push_str(&chunks[i].as_ref()[len..]);
        used[i] = true;
    }

    (merged, used)
}

/// Number of unused chunks whose text equals some used chunk.
fn count_repeats<S: AsRef<str>>(chunks: &[S], used: &[bool]) -> usize {
    (0..chunks.len())
        .filter(|&i| !used[i])
        .filter(|&i| (0..chunks.len()).any(|j| used[j] && chunks[j].as_ref() == chunks[i].as_ref()))
        .count()
}

/// Marks every chunk whose text already appeared earlier in the input.
/// `start` is never marked.
fn later_copies<S: AsRef<str>>(chunks: &[S], start: usize) -> Vec<bool> {
    let mut marks: Vec<bool> = (0..chunks.len())
        .map(|i| (0..i).any(|j| chunks[j].as_ref() == chunks[i].as_ref()))
        .collect();
    marks[start] = false;
    marks
}

/// Depth-first stitch that undoes a placement when it leads to a dead end.
struct Backtrack<'a, S> {
    chunks: &'a [S],
    overlap_size: usize,
    budget: usize,
}

impl<S: AsRef<str>> Backtrack<'_, S> {
    /// Returns true once every chunk has been placed.
    fn extend(&mut self, merged: &mut String, used: &mut [bool], placed: usize) -> bool {
        if placed == self.chunks.len() {
            return true;
        }
        for i in 0..self.chunks.len() {
            if used[i] {
                continue;
            }
            let chunk = self.chunks[i].as_ref();
            let Some(len) = overlap_len(merged, chunk, self.overlap_size) else {
                continue;
            };
            if self.budget == 0 {
                return false;
            }
            self.budget -= 1;

            let mark = merged.len();
            merged.push_str(&chunk[len..]);
            used[i] = true;
            if self.extend(merged, used, placed + 1) {
                return true;
            }
            merged.truncate(mark);
            used[i] = false;
        }
        false
    }
}

/// Byte length of the shortest overlap where `left` ends with the text
/// `right` starts with.
///
/// The overlap must span at least `min_chars` characters, or all of `right`
/// when `right` is shorter than that.
fn overlap_len(left: &str, right: &str, min_chars: usize) -> Option<usize> {
    let min_chars = min_chars.min(right.chars().count());
    if min_chars == 0 {
        return None;
    }
    let head = prefix_chars(right, min_chars);
    let highest = left.len().checked_sub(head.len())?;
    let lowest = left.len().saturating_sub(right.len());
    (lowest..=highest)
        .rev()
        .filter(|&p| left.is_char_boundary(p))
        .find(|&p| right.starts_with(&left[p..]))
        .map(|p| left.len() - p)
}

/// The first `n` characters of `s` (all of `s` if it is shorter).
fn prefix_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
