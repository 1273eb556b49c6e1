//! Tensor layout reorders around the NHWC/HWIO pipeline.

use winoconv_common::{Result, ensure_len};

/// NCHW `src` into NHWC `dst`.
pub fn nchw_to_nhwc<T: Copy>(
    src: &[T],
    dst: &mut [T],
    n_batches: usize,
    n_channels: usize,
    n_rows: usize,
    n_cols: usize,
) -> Result<()> {
    let size = n_batches * n_channels * n_rows * n_cols;
    ensure_len("nchw source", size, src.len())?;
    ensure_len("nhwc destination", size, dst.len())?;
    let plane = n_rows * n_cols;
    for b in 0..n_batches {
        let src = &src[b * n_channels * plane..(b + 1) * n_channels * plane];
        let dst = &mut dst[b * n_channels * plane..(b + 1) * n_channels * plane];
        for c in 0..n_channels {
            for p in 0..plane {
                dst[p * n_channels + c] = src[c * plane + p];
            }
        }
    }
    Ok(())
}

/// NHWC `src` into NCHW `dst`.
pub fn nhwc_to_nchw<T: Copy>(
    src: &[T],
    dst: &mut [T],
    n_batches: usize,
    n_rows: usize,
    n_cols: usize,
    n_channels: usize,
) -> Result<()> {
    let size = n_batches * n_channels * n_rows * n_cols;
    ensure_len("nhwc source", size, src.len())?;
    ensure_len("nchw destination", size, dst.len())?;
    let plane = n_rows * n_cols;
    for b in 0..n_batches {
        let src = &src[b * n_channels * plane..(b + 1) * n_channels * plane];
        let dst = &mut dst[b * n_channels * plane..(b + 1) * n_channels * plane];
        for p in 0..plane {
            for c in 0..n_channels {
                dst[c * plane + p] = src[p * n_channels + c];
            }
        }
    }
    Ok(())
}

/// OIHW weights into HWIO.
pub fn oihw_to_hwio<T: Copy>(
    src: &[T],
    dst: &mut [T],
    n_output_channels: usize,
    n_input_channels: usize,
    n_rows: usize,
    n_cols: usize,
) -> Result<()> {
    let size = n_output_channels * n_input_channels * n_rows * n_cols;
    ensure_len("oihw weights", size, src.len())?;
    ensure_len("hwio weights", size, dst.len())?;
    for o in 0..n_output_channels {
        for i in 0..n_input_channels {
            for h in 0..n_rows {
                for w in 0..n_cols {
                    let from = ((o * n_input_channels + i) * n_rows + h) * n_cols + w;
                    let to = ((h * n_cols + w) * n_input_channels + i) * n_output_channels + o;
                    dst[to] = src[from];
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nchw_round_trip() {
        let (n, c, h, w) = (2, 3, 2, 4);
        let src: Vec<u32> = (0..(n * c * h * w) as u32).collect();
        let mut nhwc = vec![0; src.len()];
        nchw_to_nhwc(&src, &mut nhwc, n, c, h, w).unwrap();
        // Batch 0, row 0, col 1, channel 2 sits at NCHW index 2*8 + 1.
        assert_eq!(nhwc[3 + 2], 17);
        let mut back = vec![0; src.len()];
        nhwc_to_nchw(&nhwc, &mut back, n, h, w, c).unwrap();
        assert_eq!(back, src);
    }

    #[test]
    fn oihw_moves_output_channel_innermost() {
        let (o, i, h, w) = (2, 3, 3, 3);
        let src: Vec<u32> = (0..(o * i * h * w) as u32).collect();
        let mut dst = vec![0; src.len()];
        oihw_to_hwio(&src, &mut dst, o, i, h, w).unwrap();
        // (h=1, w=2, i=1, o=1) is OIHW index ((1*3+1)*3+1)*3+2 = 41.
        assert_eq!(dst[((3 + 2) * 3 + 1) * 2 + 1], 41);
    }

    #[test]
    fn length_mismatch_is_reported() {
        let mut dst = vec![0u8; 4];
        let err = nchw_to_nhwc(&[0u8; 3], &mut dst, 1, 1, 2, 2).unwrap_err();
        assert!(err.is_invalid_usage());
    }
}
