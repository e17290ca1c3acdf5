use std::fmt;

use log::debug;

use crate::align::Token;
use crate::error::{Error, Result};
use crate::lod::Lod;

/// Row-major `[rows, width]` token tensor carrying a relative-offset LoD.
///
/// The LoD is validated against the row count on every constructor, so a
/// `LodTensor` in hand always has a consistent segmentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LodTensor {
    dims: [usize; 2],
    data: Vec<Token>,
    lod: Lod,
}

impl LodTensor {
    pub fn new(data: Vec<Token>, width: usize, lod: Lod) -> Result<Self> {
        if width == 0 {
            return Err(Error::invalid("tensor width must be >= 1"));
        }
        if data.len() % width != 0 {
            return Err(Error::invalid(format!(
                "{} values do not fill rows of width {}",
                data.len(),
                width
            )));
        }
        let rows = data.len() / width;
        check_lod(&lod, rows)?;
        Ok(LodTensor {
            dims: [rows, width],
            data,
            lod,
        })
    }

    /// A `[len, 1]` tensor, the layout CTC alignment works on.
    pub fn column(data: Vec<Token>, lod: Lod) -> Result<Self> {
        Self::new(data, 1, lod)
    }

    pub fn dims(&self) -> [usize; 2] {
        self.dims
    }

    pub fn rows(&self) -> usize {
        self.dims[0]
    }

    pub fn width(&self) -> usize {
        self.dims[1]
    }

    pub fn data(&self) -> &[Token] {
        &self.data
    }

    pub fn lod(&self) -> &Lod {
        &self.lod
    }

    pub fn set_lod(&mut self, lod: Lod) -> Result<()> {
        check_lod(&lod, self.rows())?;
        self.lod = lod;
        Ok(())
    }

    /// Top-level sequence count, or the row count when there is no LoD.
    pub fn batch_size(&self) -> usize {
        if self.lod.is_empty() {
            self.rows()
        } else {
            self.lod.num_sequences(0)
        }
    }

    /// Rows `begin..end` as a new tensor without LoD.
    pub fn slice_rows(&self, begin: usize, end: usize) -> Result<LodTensor> {
        if begin > end || end > self.rows() {
            return Err(Error::invalid(format!(
                "row range {}..{} out of range for {} rows",
                begin,
                end,
                self.rows()
            )));
        }
        let width = self.width();
        Ok(LodTensor {
            dims: [end - begin, width],
            data: self.data[begin * width..end * width].to_vec(),
            lod: Lod::default(),
        })
    }

    /// Split the batch into at most `parts` pieces of whole top-level
    /// sequences. Every piece gets an even share; the final part also takes
    /// the remainder.
    pub fn split(&self, parts: usize) -> Result<Vec<LodTensor>> {
        if parts == 0 {
            return Err(Error::invalid("cannot split into zero parts"));
        }
        let batch = self.batch_size();
        if batch == 0 {
            return Ok(Vec::new());
        }
        let result_size = batch.min(parts);
        let remainder = batch % parts;
        let step = batch / result_size;
        debug!(
            "splitting batch of {} into {} parts (step {}, remainder {})",
            batch, result_size, step, remainder
        );

        let mut results = Vec::with_capacity(result_size);
        for i in 0..result_size {
            let begin = i * step;
            let mut end = (i + 1) * step;
            if i + 1 == parts {
                end += remainder;
            }

            if self.lod.is_empty() {
                results.push(self.slice_rows(begin, end)?);
            } else {
                let (lengths, (row_begin, row_end)) = self.lod.sub_lod_and_offset(begin, end, 0)?;
                let mut piece = self.slice_rows(row_begin, row_end)?;
                piece.set_lod(Lod::from_lengths(&lengths))?;
                results.push(piece);
            }
        }
        Ok(results)
    }

    /// Concatenate tensors row-wise, stitching their LoDs together.
    pub fn merge(tensors: &[LodTensor]) -> Result<LodTensor> {
        let Some(first) = tensors.first() else {
            return Err(Error::invalid("nothing to merge"));
        };
        let width = first.width();
        let mut levels = first.lod.clone().into_levels();
        let mut data = first.data.clone();

        for t in &tensors[1..] {
            if t.width() != width {
                return Err(Error::invalid(format!(
                    "cannot merge width {} into width {}",
                    t.width(),
                    width
                )));
            }
            if t.lod.num_levels() != levels.len() {
                return Err(Error::invalid(format!(
                    "cannot merge a {}-level LoD into a {}-level LoD",
                    t.lod.num_levels(),
                    levels.len()
                )));
            }
            for (merged, level) in levels.iter_mut().zip(t.lod.levels()) {
                let offset = merged.last().copied().unwrap_or(0);
                merged.extend(level.iter().skip(1).map(|o| o + offset));
            }
            data.extend_from_slice(&t.data);
        }

        LodTensor::new(data, width, Lod::new(levels))
    }
}

fn check_lod(lod: &Lod, rows: usize) -> Result<()> {
    if lod.check(Some(rows)) {
        Ok(())
    } else {
        Err(Error::invalid(format!("LoD {} is not valid for {} rows", lod, rows)))
    }
}

impl fmt::Display for LodTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dim: {}, {}", self.dims[0], self.dims[1])?;
        writeln!(f, "lod: {}", self.lod)?;
        // only the first ten values
        for v in self.data.iter().take(10) {
            write!(f, "{} ", v)?;
        }
        Ok(())
    }
}
