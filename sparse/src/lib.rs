use itertools::Itertools;
use nalgebra::storage::RawStorage;
use nalgebra::{DMatrix, Dim, Matrix};
use std::convert::AsRef;
use std::iter::once;
use std::mem;
use std::ops::Add;
use std::sync::atomic::{AtomicUsize, Ordering};

#[allow(non_camel_case_types)]
type float = f64;

/// Handle to a block whose values can be overwritten after the matrix has been built.
///
/// The sparsity pattern of the block is fixed when it is created with [`block_mut`], which lets
/// solvers that require a constant structure (OSQP) be updated in place every cycle.
#[derive(Clone, Debug)]
pub struct BlockRef {
    id: usize,
    nrows: usize,
    ncols: usize,
}

impl BlockRef {
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }
}

#[derive(Clone, Debug)]
pub struct Builder {
    tracked_blocks: Vec<(usize, usize, usize, DMatrix<bool>)>,
    coords: Vec<(usize, usize, float)>,
    nrows: usize,
    ncols: usize,
}

impl Builder {
    pub fn with_capacity(nrows: usize, ncols: usize, nnz: usize) -> Builder {
        Builder {
            tracked_blocks: Vec::new(),
            coords: Vec::with_capacity(nnz),
            nrows,
            ncols,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn build_csc(&mut self) -> CscMatrix {
        // Sort and sum any duplicates in the same cell
        let mut coords = mem::take(&mut self.coords);
        coords.sort_unstable_by_key(|&(r, c, _)| (c, r));
        self.coords = coords
            .into_iter()
            .coalesce(|l, r| {
                if l.0 == r.0 && l.1 == r.1 {
                    Ok((l.0, l.1, l.2 + r.2))
                } else {
                    Err((l, r))
                }
            })
            .collect();

        let mut indptr = vec![0; self.ncols + 1];
        let mut indices = vec![0; self.coords.len()];
        let mut data = vec![0.0; self.coords.len()];

        // Fill in CSC column start and end pointer and row index
        let mut last_c = 0;
        for (i, &(r, c, val)) in self.coords.iter().enumerate() {
            while last_c < c {
                last_c += 1;
                indptr[last_c] = i;
            }
            indices[i] = r;
            data[i] = val;
        }
        // Set the remaining column index pointers to one past the end of the data array
        while last_c < self.ncols {
            last_c += 1;
            indptr[last_c] = self.coords.len();
        }

        // Calculate the tracked block indices
        let mut tracked_blocks = self
            .tracked_blocks
            .iter()
            .map(|(id, row, col, sparsity)| {
                let (nrows, ncols) = sparsity.shape();
                let mut block_indices = DMatrix::from_element(nrows, ncols, None);

                for c in 0..ncols {
                    let rows_start = indptr[col + c];
                    let rows_end = indptr[col + c + 1];
                    let row_indices = &indices[rows_start..rows_end];

                    // row_indices are guaranteed to be in ascending order and every tracked
                    // entry was inserted into coords, so the search cannot miss.
                    for r in (0..nrows).filter(|&r| sparsity[(r, c)]) {
                        if let Ok(offset) = row_indices.binary_search(&(row + r)) {
                            block_indices[(r, c)] = Some(rows_start + offset);
                        }
                    }
                }

                (*id, block_indices)
            })
            .collect::<Vec<_>>();

        tracked_blocks.sort_by_key(|b| b.0);

        CscMatrix {
            nrows: self.nrows,
            ncols: self.ncols,
            indptr,
            indices,
            data,
            tracked_blocks,
        }
    }
}

impl AsRef<Builder> for Builder {
    fn as_ref(&self) -> &Builder {
        self
    }
}

impl Add for Builder {
    type Output = Builder;

    fn add(self, other: Builder) -> Builder {
        add(&[self, other])
    }
}

pub fn zeros(nrows: usize, ncols: usize) -> Builder {
    Builder::with_capacity(nrows, ncols, 0)
}

pub fn eye(n: usize) -> Builder {
    let mut builder = Builder::with_capacity(n, n, n);
    for i in 0..n {
        builder.coords.push((i, i, 1.0));
    }
    builder
}

/// Builds a block from the non-zero entries of a dense matrix.
pub fn block<R: Dim, C: Dim, S: RawStorage<float, R, C>>(block: &Matrix<float, R, C, S>) -> Builder {
    let (nrows, ncols) = block.shape();

    let coords = (0..nrows)
        .flat_map(move |r| (0..ncols).map(move |c| (r, c, block[(r, c)])))
        .filter(|&(_, _, val)| val != 0.0)
        .collect();

    Builder {
        tracked_blocks: Vec::new(),
        coords,
        nrows,
        ncols,
    }
}

/// Selection matrix with a single one per row at column `indices[row]`.
pub fn selection(ncols: usize, indices: &[usize]) -> Builder {
    let mut builder = Builder::with_capacity(indices.len(), ncols, indices.len());
    for (r, &c) in indices.iter().enumerate() {
        assert!(c < ncols, "selection index {} out of range for {} columns", c, ncols);
        builder.coords.push((r, c, 1.0));
    }
    builder
}

pub fn block_mut<R: Dim, C: Dim, S: RawStorage<bool, R, C>>(
    sparsity: &Matrix<bool, R, C, S>,
) -> (Builder, BlockRef) {
    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

    let (nrows, ncols) = sparsity.shape();

    let coords = (0..nrows)
        .flat_map(move |r| {
            (0..ncols)
                .filter(move |&c| sparsity[(r, c)])
                .map(move |c| (r, c, 0.0))
        })
        .collect();

    let sparsity = DMatrix::from_fn(nrows, ncols, |r, c| sparsity[(r, c)]);

    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);

    (
        Builder {
            tracked_blocks: vec![(id, 0, 0, sparsity)],
            coords,
            nrows,
            ncols,
        },
        BlockRef { id, nrows, ncols },
    )
}

pub fn add<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    fn op(acc: &mut Builder, nrows: &mut usize, ncols: &mut usize, block: &Builder) {
        assert_eq!(
            *nrows, block.nrows,
            "matrices being added must have the same number of rows"
        );
        assert_eq!(
            *ncols, block.ncols,
            "matrices being added must have the same number of columns"
        );
        block_merge(acc, block, 0, 0);
    }

    let (nrows, ncols) = blocks
        .first()
        .map(AsRef::as_ref)
        .map(|b| (b.nrows, b.ncols))
        .unwrap_or((0, 0));
    merge_op(blocks, nrows, ncols, op)
}

pub fn hstack<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    fn op(acc: &mut Builder, nrows: &mut usize, ncols: &mut usize, block: &Builder) {
        assert_eq!(
            *nrows, block.nrows,
            "hstack requires matrices to have the same number of rows"
        );
        block_merge(acc, block, 0, *ncols);
        *ncols += block.ncols;
    }

    let nrows = blocks.first().map(|b| b.as_ref().nrows).unwrap_or(0);
    merge_op(blocks, nrows, 0, op)
}

pub fn vstack<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    fn op(acc: &mut Builder, nrows: &mut usize, ncols: &mut usize, block: &Builder) {
        assert_eq!(
            *ncols, block.ncols,
            "vstack requires matrices to have the same number of columns"
        );
        block_merge(acc, block, *nrows, 0);
        *nrows += block.nrows;
    }

    let ncols = blocks.first().map(|b| b.as_ref().ncols).unwrap_or(0);
    merge_op(blocks, 0, ncols, op)
}

pub fn block_diag<B: AsRef<Builder>>(blocks: &[B]) -> Builder {
    fn op(acc: &mut Builder, nrows: &mut usize, ncols: &mut usize, block: &Builder) {
        block_merge(acc, block, *nrows, *ncols);
        *nrows += block.nrows;
        *ncols += block.ncols;
    }

    merge_op(blocks, 0, 0, op)
}

pub fn bmat<B: AsRef<Builder>>(blocks: &[&[Option<B>]]) -> Builder {
    let nrows = blocks.len();
    if nrows == 0 {
        return zeros(0, 0);
    }
    let ncols = blocks[0].len();
    assert!(
        blocks.iter().all(|row| row.len() == ncols),
        "bmat must be given a rectangular layout"
    );

    // Check that all blocks in a row/column must have the same number of rows/columns
    let mut block_nrows = vec![usize::MAX; nrows];
    let mut block_ncols = vec![usize::MAX; ncols];
    fn check_or_assign(left: &mut usize, right: usize, name: &str) {
        assert!(right != usize::MAX);
        if *left == usize::MAX {
            *left = right;
        } else {
            assert_eq!(
                *left, right,
                "bmat requires all blocks in a {0} to have the same number of {0}s",
                name,
            );
        }
    }
    for (row, nrows) in blocks.iter().zip(&mut block_nrows) {
        for (block, ncols) in row.iter().zip(&mut block_ncols) {
            if let Some(block) = block {
                let block = block.as_ref();
                check_or_assign(nrows, block.nrows, "row");
                check_or_assign(ncols, block.ncols, "column");
            }
        }
    }

    // Calculate row and column offsets and check that the resulting matrix has a known size
    fn cumsum(vals: &mut [usize], name: &str) {
        let mut acc = 0;
        for n in vals {
            if *n == usize::MAX {
                panic!("bmat requires all {}s to have a known size", name);
            }
            acc += *n;
            *n = acc;
        }
    }
    cumsum(&mut block_nrows, "row");
    cumsum(&mut block_ncols, "column");

    // Merge the blocks
    let mut acc = preallocate_for_merge(
        blocks
            .iter()
            .flat_map(|r| r.iter().filter_map(Option::as_ref))
            .map(AsRef::as_ref),
    );
    acc.nrows = block_nrows[nrows - 1];
    acc.ncols = block_ncols[ncols - 1];

    blocks
        .iter()
        .zip(once(&0).chain(&block_nrows))
        .fold(acc, |acc, (row, &row_offset)| {
            row.iter().zip(once(&0).chain(&block_ncols)).fold(
                acc,
                |mut acc, (block, &col_offset)| {
                    if let Some(block) = block {
                        block_merge(&mut acc, block.as_ref(), row_offset, col_offset);
                    }
                    acc
                },
            )
        })
}

fn preallocate_for_merge<'a, I: Iterator<Item = &'a Builder>>(blocks: I) -> Builder {
    let (nnz, nt) = blocks.fold((0, 0), |(nnz, nt), b| {
        (nnz + b.coords.len(), nt + b.tracked_blocks.len())
    });
    let mut builder = Builder::with_capacity(0, 0, nnz);
    builder.tracked_blocks = Vec::with_capacity(nt);
    builder
}

fn merge_op<B: AsRef<Builder>>(
    blocks: &[B],
    nrows: usize,
    ncols: usize,
    op: fn(&mut Builder, &mut usize, &mut usize, &Builder),
) -> Builder {
    let acc = preallocate_for_merge(blocks.iter().map(AsRef::as_ref));

    let (mut acc, final_nrows, final_ncols) = blocks.iter().map(AsRef::as_ref).fold(
        (acc, nrows, ncols),
        |(mut acc, mut nrows, mut ncols), block| {
            op(&mut acc, &mut nrows, &mut ncols, block);
            (acc, nrows, ncols)
        },
    );

    acc.nrows = final_nrows;
    acc.ncols = final_ncols;
    acc
}

fn block_merge(left: &mut Builder, right: &Builder, row_shift: usize, col_shift: usize) {
    let left_coords_len = left.coords.len();
    let left_tracked_blocks_len = left.tracked_blocks.len();

    left.coords.extend_from_slice(&right.coords);
    left.tracked_blocks.extend_from_slice(&right.tracked_blocks);

    // Update right coordinates
    for (r, c, _) in &mut left.coords[left_coords_len..] {
        *r += row_shift;
        *c += col_shift;
    }

    // Update tracked block positions
    for (_, r, c, _) in &mut left.tracked_blocks[left_tracked_blocks_len..] {
        *r += row_shift;
        *c += col_shift;
    }
}

#[derive(Clone, Debug)]
pub struct CscMatrix {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<float>,
    tracked_blocks: Vec<(usize, DMatrix<Option<usize>>)>,
}

impl CscMatrix {
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn data(&self) -> &[float] {
        &self.data
    }

    /// Returns true if no stored entry lies below the diagonal.
    pub fn is_structurally_upper_tri(&self) -> bool {
        (0..self.ncols).all(|c| {
            self.indices[self.indptr[c]..self.indptr[c + 1]]
                .iter()
                .all(|&r| r <= c)
        })
    }

    /// Overwrites every occurrence of a tracked block.
    ///
    /// Entries of `value` outside the block's sparsity pattern must be zero.
    pub fn set_block<R: Dim, C: Dim, S: RawStorage<float, R, C>>(
        &mut self,
        block: &BlockRef,
        value: &Matrix<float, R, C, S>,
    ) {
        let (nrows, ncols) = value.shape();
        assert_eq!(block.nrows, nrows);
        assert_eq!(block.ncols, ncols);

        let start_idx = self
            .tracked_blocks
            .partition_point(|&(id, _)| id < block.id);
        assert!(
            self.tracked_blocks.get(start_idx).map(|b| b.0) == Some(block.id),
            "Block not in this matrix"
        );

        for (id, indices) in &self.tracked_blocks[start_idx..] {
            if *id != block.id {
                break;
            }
            for c in 0..ncols {
                for r in 0..nrows {
                    match indices[(r, c)] {
                        Some(index) => self.data[index] = value[(r, c)],
                        None => debug_assert_eq!(
                            0.0,
                            value[(r, c)],
                            "unexpected non-zero element in sparse tracked block"
                        ),
                    }
                }
            }
        }
    }

    pub fn to_dense(&self) -> DMatrix<float> {
        let mut mat = DMatrix::zeros(self.nrows, self.ncols);

        for c in 0..self.ncols {
            for i in self.indptr[c]..self.indptr[c + 1] {
                let r = self.indices[i];
                mat[(r, c)] = self.data[i];
            }
        }

        mat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix1, Matrix2, Matrix2x3, Matrix3, Matrix3x2};

    #[test]
    fn empty_ops_should_not_panic() {
        add::<Builder>(&[]);
        hstack::<Builder>(&[]);
        vstack::<Builder>(&[]);
        block_diag::<Builder>(&[]);
    }

    #[test]
    fn add_simple() {
        #[rustfmt::skip]
        let a = Matrix3::new(
            14.0, 0.0, 9.0,
            0.0, 0.0, 0.0,
            1.0, 0.0, 7.0,
        );
        #[rustfmt::skip]
        let b = Matrix3::new(
            2.0, 0.0, 5.0,
            0.0, 4.0, 6.0,
            0.0, 0.0, 3.0,
        );

        #[rustfmt::skip]
        let expected = DMatrix::from_row_slice(3, 3, &[
            16.0, 0.0, 14.0,
            0.0, 4.0, 6.0,
            1.0, 0.0, 10.0,
        ]);

        let comparison = (block(&a) + block(&b)).build_csc().to_dense();

        assert_eq!(expected, comparison);
    }

    #[test]
    #[should_panic]
    fn add_panic() {
        let a = Matrix3::new(14.0, 0.0, 9.0, 0.0, 0.0, 0.0, 1.0, 0.0, 7.0);
        let b = Matrix2x3::new(2.0, 0.0, 5.0, 0.0, 4.0, 6.0);

        let _ = block(&a) + block(&b);
    }

    #[test]
    fn block_diag_empty_row() {
        let a = Matrix1::new(1.0);
        #[rustfmt::skip]
        let b = Matrix2x3::new(
            2.0, 3.0, 0.0,
            5.0, 6.0, 0.0,
        );
        #[rustfmt::skip]
        let c = Matrix3x2::new(
            0.0, 0.0,
            10.0, 0.0,
            12.0, 0.0,
        );

        #[rustfmt::skip]
        let expected = DMatrix::from_row_slice(6, 6, &[
            1.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 2.0, 3.0, 0.0, 0.0, 0.0,
            0.0, 5.0, 6.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 10.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 12.0, 0.0,
        ]);

        let comparison = block_diag(&[block(&a), block(&b), block(&c)])
            .build_csc()
            .to_dense();

        assert_eq!(expected, comparison);
    }

    #[test]
    fn selection_rows() {
        #[rustfmt::skip]
        let expected = DMatrix::from_row_slice(2, 4, &[
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]);

        assert_eq!(expected, selection(4, &[2, 3]).build_csc().to_dense());
        assert_eq!((0, 4), selection(4, &[]).build_csc().shape());
    }

    #[test]
    fn upper_triangular_structure() {
        let upper = Matrix2::new(true, true, false, true);
        let (upper, _) = block_mut(&upper);
        assert!(upper.clone().build_csc().is_structurally_upper_tri());

        let full = bmat(&[&[Some(upper), None], &[Some(eye(2)), Some(eye(2))]]).build_csc();
        assert!(!full.is_structurally_upper_tri());
    }

    #[test]
    fn bmat_mut_blocks() {
        #[rustfmt::skip]
        let b = Matrix2::new(
            2.0, 3.0,
            5.0, 0.0,
        );

        let c_sp = Matrix2::new(true, true, true, true);
        #[rustfmt::skip]
        let c_val = Matrix2::new(
            14.0, 0.0,
            16.0, 17.0,
        );
        let (c, c_block) = block_mut(&c_sp);

        #[rustfmt::skip]
        let d_sp = Matrix3x2::new(
            false, false,
            true, false,
            true, false,
        );
        #[rustfmt::skip]
        let d_val_1 = Matrix3x2::new(
            0.0, 0.0,
            0.0, 0.0,
            1.0, 0.0,
        );
        #[rustfmt::skip]
        let d_val_2 = Matrix3x2::new(
            0.0, 0.0,
            99.0, 0.0,
            18.0, 0.0,
        );
        let (d, d_block) = block_mut(&d_sp);

        #[rustfmt::skip]
        let expected_1 = DMatrix::from_row_slice(6, 6, &[
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 2.0, 3.0, 14.0, 0.0,
            0.0, 0.0, 5.0, 0.0, 16.0, 17.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            1.0, 0.0, 0.0, 0.0, 1.0, 0.0,
        ]);

        #[rustfmt::skip]
        let expected_2 = DMatrix::from_row_slice(6, 6, &[
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 2.0, 3.0, 14.0, 0.0,
            0.0, 0.0, 5.0, 0.0, 16.0, 17.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            99.0, 0.0, 0.0, 0.0, 99.0, 0.0,
            18.0, 0.0, 0.0, 0.0, 18.0, 0.0,
        ]);

        let mut comparison = bmat(&[
            &[Some(&zeros(1, 2)), None, None],
            &[None, Some(&block(&b)), Some(&c)],
            &[Some(&d), None, Some(&d)],
        ])
        .build_csc();

        comparison.set_block(&c_block, &c_val);
        comparison.set_block(&d_block, &d_val_1);

        assert_eq!(expected_1, comparison.to_dense());

        comparison.set_block(&d_block, &d_val_2);

        assert_eq!(expected_2, comparison.to_dense());
    }

    #[test]
    fn tracked_zero_entries_are_stored() {
        let sp = Matrix2::new(true, false, false, true);
        let (mut b, b_block) = block_mut(&sp);
        let mut csc = b.build_csc();

        assert_eq!(2, csc.nnz());
        csc.set_block(&b_block, &Matrix2::new(0.0, 0.0, 0.0, 4.0));
        assert_eq!(&[0.0, 4.0], csc.data());
    }
}
