// ============================================================================
// DENSE VECTOR / MATRIX KERNELS
// Row-major f32 buffers. Products go through matrixmultiply::sgemm with
// explicit strides so transposed operands are never materialized.
// ============================================================================

#[inline]
pub fn vec_add(a: &[f32], b: &[f32]) -> Vec<f32> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x + y).collect()
}

#[inline]
pub fn vec_add_inplace(a: &mut [f32], b: &[f32]) {
    debug_assert_eq!(a.len(), b.len());
    for (x, y) in a.iter_mut().zip(b.iter()) { *x += y; }
}

#[inline]
pub fn vec_scale_inplace(a: &mut [f32], s: f32) {
    for x in a.iter_mut() { *x *= s; }
}

#[inline]
pub fn vec_relu(a: &[f32]) -> Vec<f32> {
    a.iter().map(|&x| x.max(0.0)).collect()
}

#[inline]
pub fn vec_max(a: &[f32]) -> f32 {
    a.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
}

/// Index of the largest entry; ties resolve to the lowest index.
#[inline]
pub fn argmax(a: &[f32]) -> usize {
    let mut best = 0;
    for (i, &x) in a.iter().enumerate().skip(1) {
        if x > a[best] { best = i; }
    }
    best
}

/// Max-subtracted softmax. Every exponent is `<= 0`, so nothing overflows.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_l = vec_max(logits);
    let mut exps: Vec<f32> = logits.iter().map(|&x| (x - max_l).exp()).collect();
    let sum: f32 = exps.iter().sum();
    vec_scale_inplace(&mut exps, 1.0 / sum);
    exps
}

// ----------------------------------------------------------------------------
// sgemm wrappers
// ----------------------------------------------------------------------------

/// Last touched offset + 1 of a strided `rows x cols` view.
#[inline]
fn extent(rows: usize, cols: usize, rs: usize, cs: usize) -> usize {
    if rows == 0 || cols == 0 { 0 } else { (rows - 1) * rs + (cols - 1) * cs + 1 }
}

/// `C[m,n] = A[m,k] @ B[k,n] + beta * C` with C dense row-major.
#[allow(clippy::too_many_arguments)]
fn gemm(
    m: usize, k: usize, n: usize,
    a: &[f32], rsa: usize, csa: usize,
    b: &[f32], rsb: usize, csb: usize,
    beta: f32, c: &mut [f32],
) {
    assert!(extent(m, k, rsa, csa) <= a.len(), "gemm: A view [{m},{k}] exceeds buffer of {}", a.len());
    assert!(extent(k, n, rsb, csb) <= b.len(), "gemm: B view [{k},{n}] exceeds buffer of {}", b.len());
    assert!(m * n <= c.len(), "gemm: C [{m},{n}] exceeds buffer of {}", c.len());
    // SAFETY: the three asserts above bound every offset sgemm reads or writes.
    unsafe {
        matrixmultiply::sgemm(
            m, k, n,
            1.0,
            a.as_ptr(), rsa as isize, csa as isize,
            b.as_ptr(), rsb as isize, csb as isize,
            beta,
            c.as_mut_ptr(), n as isize, 1,
        );
    }
}

/// `x[rows] @ W[rows, cols] -> [cols]`
pub fn vec_mat(x: &[f32], w: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    debug_assert_eq!(x.len(), rows);
    debug_assert_eq!(w.len(), rows * cols);
    let mut out = vec![0.0f32; cols];
    gemm(1, rows, cols, x, rows, 1, w, cols, 1, 0.0, &mut out);
    out
}

/// `x[cols] @ W[rows, cols]^T -> [rows]`
pub fn vec_mat_t(x: &[f32], w: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    debug_assert_eq!(x.len(), cols);
    debug_assert_eq!(w.len(), rows * cols);
    let mut out = vec![0.0f32; rows];
    // W^T[k][j] = W[j][k] lives at j * cols + k: row stride 1, col stride cols.
    gemm(1, cols, rows, x, cols, 1, w, 1, cols, 0.0, &mut out);
    out
}

/// `G[x.len(), y.len()] += outer(x, y)`
pub fn outer_acc(g: &mut [f32], x: &[f32], y: &[f32]) {
    debug_assert_eq!(g.len(), x.len() * y.len());
    gemm(x.len(), 1, y.len(), x, 1, 1, y, y.len(), 1, 1.0, g);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn vec_mat_matches_naive() {
        // W = [[1, 2, 3], [4, 5, 6]]
        let w = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let out = vec_mat(&[1.0, -1.0], &w, 2, 3);
        assert_eq!(out, vec![-3.0, -3.0, -3.0]);
    }

    #[test]
    fn vec_mat_t_matches_naive() {
        let w = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let out = vec_mat_t(&[1.0, 0.0, 2.0], &w, 2, 3);
        assert_eq!(out, vec![7.0, 16.0]);
    }

    #[test]
    fn outer_acc_adds_into_existing() {
        let mut g = vec![1.0; 6];
        outer_acc(&mut g, &[1.0, 2.0], &[1.0, 0.0, -1.0]);
        assert_eq!(g, vec![2.0, 1.0, 0.0, 3.0, 1.0, -1.0]);
    }

    #[test]
    fn softmax_survives_huge_logits() {
        let p = softmax(&[1000.0, 1000.0, -1000.0]);
        assert!(p.iter().all(|x| x.is_finite()));
        assert_relative_eq!(p[0], 0.5, epsilon = 1e-6);
        assert_relative_eq!(p.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn argmax_prefers_first_tie() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), 1);
        assert_eq!(argmax(&[3.0]), 0);
    }
}
