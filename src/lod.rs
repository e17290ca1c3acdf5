//! Level-of-detail segmentation for batches of variable-length sequences.
//!
//! A `Lod` is a stack of offset lists, coarsest level first. In the
//! relative form (the one tensors carry) the lowest level indexes tensor
//! rows and every higher level indexes entries of the level below it. In
//! the absolute form every level indexes tensor rows directly.
//!
//! `[[0, 2, 3], [0, 3, 5, 9]]` is a batch of two sequences: the first
//! holds sub-sequences `0..3` and `3..5`, the second holds `5..9`.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lod(Vec<Vec<usize>>);

impl Lod {
    pub fn new(levels: Vec<Vec<usize>>) -> Self {
        Lod(levels)
    }

    pub fn from_lengths(lengths: &[Vec<usize>]) -> Self {
        let levels = lengths
            .iter()
            .map(|lens| {
                let mut offsets = Vec::with_capacity(lens.len() + 1);
                offsets.push(0);
                for &len in lens {
                    let last = offsets[offsets.len() - 1];
                    offsets.push(last + len);
                }
                offsets
            })
            .collect();
        Lod(levels)
    }

    pub fn levels(&self) -> &[Vec<usize>] {
        &self.0
    }

    pub fn into_levels(self) -> Vec<Vec<usize>> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn num_levels(&self) -> usize {
        self.0.len()
    }

    /// The finest level, whose offsets always index tensor rows.
    pub fn lowest_level(&self) -> Option<&[usize]> {
        self.0.last().map(Vec::as_slice)
    }

    pub fn num_sequences(&self, level: usize) -> usize {
        self.0
            .get(level)
            .map(|l| l.len().saturating_sub(1))
            .unwrap_or(0)
    }

    /// Validate a relative-offset LoD, optionally against the tensor height.
    pub fn check(&self, tensor_height: Option<usize>) -> bool {
        if self.0.is_empty() {
            return true;
        }
        for level in &self.0 {
            if level.len() < 2 || level[0] != 0 || !is_non_decreasing(level) {
                return false;
            }
        }
        if let (Some(height), Some(lowest)) = (tensor_height, self.0.last()) {
            if lowest[lowest.len() - 1] != height {
                return false;
            }
        }
        // each higher level must end exactly at the last entry of the level below
        self.0
            .windows(2)
            .all(|pair| pair[0][pair[0].len() - 1] == pair[1].len() - 1)
    }

    pub fn check_absolute(&self, tensor_height: Option<usize>) -> bool {
        let mut height = tensor_height;
        for level in &self.0 {
            if level.len() < 2 || level[0] != 0 || !is_non_decreasing(level) {
                return false;
            }
            let last = level[level.len() - 1];
            match height {
                None => height = Some(last),
                Some(h) if h != last => return false,
                Some(_) => {}
            }
        }
        true
    }

    /// Convert to absolute offsets. The lowest level is already absolute.
    pub fn to_absolute(&self) -> Result<Lod> {
        let mut result = self.0.clone();
        for level in (0..result.len().saturating_sub(1)).rev() {
            let (upper, lower) = result.split_at_mut(level + 1);
            let below = &lower[0];
            for offset in upper[level].iter_mut() {
                let idx = *offset;
                *offset = *below.get(idx).ok_or_else(|| {
                    Error::invalid(format!(
                        "offset {} at level {} exceeds level {} ({} entries)",
                        idx,
                        level,
                        level + 1,
                        below.len()
                    ))
                })?;
            }
        }
        Ok(Lod(result))
    }

    /// The sub-LoD covering elements `begin..end` of `level` and everything
    /// beneath them, rebased so each level starts at 0.
    pub fn slice_in_level(&self, level: usize, begin: usize, end: usize) -> Result<Lod> {
        let top = self.0.get(level).ok_or_else(|| {
            Error::invalid(format!("level {} out of range ({} levels)", level, self.0.len()))
        })?;
        if begin > end || end >= top.len() {
            return Err(Error::invalid(format!(
                "element range {}..{} out of range for level {} ({} offsets)",
                begin,
                end,
                level,
                top.len()
            )));
        }

        let mut res: Vec<Vec<usize>> = Vec::with_capacity(self.0.len() - level);
        res.push(top[begin..=end].to_vec());
        for in_level in &self.0[level + 1..] {
            let above = &res[res.len() - 1];
            let (from, to) = (above[0], above[above.len() - 1]);
            if from > to || to >= in_level.len() {
                return Err(Error::invalid(format!(
                    "offset {} exceeds lower level ({} offsets)",
                    to,
                    in_level.len()
                )));
            }
            res.push(in_level[from..=to].to_vec());
        }

        if !res.iter().all(|level| is_non_decreasing(level)) {
            return Err(Error::invalid("LoD offsets must be non-decreasing"));
        }
        for level in &mut res {
            let front = level[0];
            for offset in level.iter_mut() {
                *offset -= front;
            }
        }
        Ok(Lod(res))
    }

    /// Per-level sequence lengths of elements `start..end` at `start_level`
    /// and below, plus the absolute row span they cover.
    pub fn sub_lod_and_offset(
        &self,
        mut start: usize,
        mut end: usize,
        start_level: usize,
    ) -> Result<(Vec<Vec<usize>>, (usize, usize))> {
        let mut lengths = Vec::new();
        for (idx, level) in self.0.iter().enumerate().skip(start_level) {
            if start > end || end >= level.len() {
                return Err(Error::invalid(format!(
                    "element range {}..{} out of range for level {} ({} offsets)",
                    start,
                    end,
                    idx,
                    level.len()
                )));
            }
            if !is_non_decreasing(&level[start..=end]) {
                return Err(Error::invalid(format!(
                    "offsets {:?} at level {} are decreasing",
                    &level[start..=end],
                    idx
                )));
            }
            lengths.push((start..end).map(|i| level[i + 1] - level[i]).collect());
            start = level[start];
            end = level[end];
        }
        Ok((lengths, (start, end)))
    }

    /// Append per-level sequence lengths; an empty LoD takes its depth from
    /// `lengths`.
    pub fn append(&mut self, lengths: &[Vec<usize>]) -> Result<()> {
        if self.0.is_empty() {
            self.0 = vec![vec![0]; lengths.len()];
        } else if self.0.len() != lengths.len() {
            return Err(Error::invalid(format!(
                "cannot append {} levels to a {}-level LoD",
                lengths.len(),
                self.0.len()
            )));
        }
        for (level, lens) in self.0.iter_mut().zip(lengths) {
            for &len in lens {
                let last = level.last().copied().unwrap_or(0);
                level.push(last + len);
            }
        }
        Ok(())
    }
}

impl fmt::Display for Lod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for level in &self.0 {
            write!(f, "{{")?;
            for offset in level {
                write!(f, "{},", offset)?;
            }
            write!(f, "}}")?;
        }
        write!(f, "}}")
    }
}

pub(crate) fn is_non_decreasing(offsets: &[usize]) -> bool {
    offsets.windows(2).all(|w| w[0] <= w[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Lod {
        // two sequences: [0..3, 3..5] and [5..9, 9..10]
        Lod::new(vec![vec![0, 2, 4], vec![0, 3, 5, 9, 10]])
    }

    #[test]
    fn display_matches_brace_form() {
        assert_eq!(Lod::new(vec![vec![0, 11, 18]]).to_string(), "{{0,11,18,}}");
        assert_eq!(Lod::default().to_string(), "{}");
    }

    #[test]
    fn check_relative() {
        assert!(Lod::default().check(Some(5)));
        assert!(sample().check(Some(10)));
        assert!(sample().check(None));
        assert!(!sample().check(Some(9)));
        assert!(!Lod::new(vec![vec![0]]).check(None));
        assert!(!Lod::new(vec![vec![1, 3]]).check(None));
        assert!(!Lod::new(vec![vec![0, 4, 2]]).check(None));
        // top level ends at 2 while the lower level has 3 sequences
        assert!(!Lod::new(vec![vec![0, 2], vec![0, 1, 2, 3]]).check(None));
        // empty segments are allowed
        assert!(Lod::new(vec![vec![0, 0, 3]]).check(Some(3)));
    }

    #[test]
    fn check_absolute_levels_share_height() {
        let abs = sample().to_absolute().unwrap();
        assert!(abs.check_absolute(Some(10)));
        assert!(abs.check_absolute(None));
        assert!(!abs.check_absolute(Some(11)));
        assert!(!sample().check_absolute(None));
    }

    #[test]
    fn to_absolute_rewrites_upper_levels() {
        let abs = sample().to_absolute().unwrap();
        assert_eq!(abs.levels(), &[vec![0, 5, 10], vec![0, 3, 5, 9, 10]]);

        let single = Lod::new(vec![vec![0, 4]]);
        assert_eq!(single.to_absolute().unwrap(), single);

        let broken = Lod::new(vec![vec![0, 7], vec![0, 1]]);
        assert!(matches!(broken.to_absolute(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn slice_in_level_rebases() {
        let lod = sample();
        let sliced = lod.slice_in_level(0, 1, 2).unwrap();
        assert_eq!(sliced.levels(), &[vec![0, 2], vec![0, 4, 5]]);

        let lower = lod.slice_in_level(1, 1, 3).unwrap();
        assert_eq!(lower.levels(), &[vec![0, 2, 6]]);

        assert!(lod.slice_in_level(2, 0, 1).is_err());
        assert!(lod.slice_in_level(0, 0, 3).is_err());
        assert!(lod.slice_in_level(0, 2, 1).is_err());
    }

    #[test]
    fn sub_lod_and_offset_reports_lengths_and_span() {
        let (lengths, span) = sample().sub_lod_and_offset(1, 2, 0).unwrap();
        assert_eq!(lengths, vec![vec![2], vec![4, 1]]);
        assert_eq!(span, (5, 10));

        let (lengths, span) = sample().sub_lod_and_offset(0, 1, 0).unwrap();
        assert_eq!(lengths, vec![vec![2], vec![3, 2]]);
        assert_eq!(span, (0, 5));
    }

    #[test]
    fn sub_lod_and_offset_rejects_decreasing_level() {
        let lod = Lod::new(vec![vec![0, 3, 1]]);
        assert!(matches!(lod.sub_lod_and_offset(0, 2, 0), Err(Error::InvalidInput(_))));

        // the upper level is fine, the rows it selects below are not
        let nested = Lod::new(vec![vec![0, 2], vec![0, 4, 1]]);
        assert!(matches!(nested.sub_lod_and_offset(0, 1, 0), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn append_and_from_lengths_agree() {
        let lengths = vec![vec![2, 2], vec![3, 2, 4, 1]];
        let mut lod = Lod::default();
        lod.append(&lengths).unwrap();
        assert_eq!(lod, sample());
        assert_eq!(Lod::from_lengths(&lengths), sample());

        lod.append(&[vec![1], vec![6]]).unwrap();
        assert_eq!(lod.levels(), &[vec![0, 2, 4, 5], vec![0, 3, 5, 9, 10, 16]]);
        assert!(lod.append(&[vec![1]]).is_err());
    }

    #[test]
    fn num_sequences_per_level() {
        let lod = sample();
        assert_eq!(lod.num_levels(), 2);
        assert_eq!(lod.num_sequences(0), 2);
        assert_eq!(lod.num_sequences(1), 4);
        assert_eq!(lod.num_sequences(5), 0);
        assert_eq!(lod.lowest_level(), Some(&[0, 3, 5, 9, 10][..]));
    }
}
