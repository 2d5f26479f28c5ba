use super::pre::TransformParams;
use ndarray::{Array2, ArrayD, Axis, Ix3};

/// A decoded box in letterboxed input pixels, before NMS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub xyxy: [f32; 4],
    pub conf: f32,
    pub cls: usize,
}

/// Output tensor layouts produced by the supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// `[1, 4 + nc, N]`: `cx, cy, w, h, score_0 .. score_nc` per column.
    ChannelsFirst { classes: usize },
    /// `[1, N, 5 + nc]`: `cx, cy, w, h, objectness, score_0 .. score_nc` per row.
    Objectness { classes: usize },
    /// `[1, N, 6]`: `x1, y1, x2, y2, conf, cls` per row, NMS already applied.
    EndToEnd,
}

impl OutputLayout {
    /// Reject tensors whose shape does not match this layout.
    pub fn check(&self, shape: &[usize]) -> anyhow::Result<()> {
        let [batch, a, b] = shape else {
            anyhow::bail!("expected a rank-3 output for {self}, got shape {shape:?}");
        };
        if *batch != 1 {
            anyhow::bail!("expected batch size 1 for {self}, got shape {shape:?}");
        }

        let ok = match *self {
            OutputLayout::ChannelsFirst { classes } => *a == 4 + classes,
            OutputLayout::Objectness { classes } => *b == 5 + classes,
            OutputLayout::EndToEnd => *b == 6,
        };
        if !ok {
            anyhow::bail!("output shape {shape:?} does not match {self}");
        }
        Ok(())
    }
}

impl std::fmt::Display for OutputLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputLayout::ChannelsFirst { classes } => write!(f, "[1, {}, N] layout", 4 + classes),
            OutputLayout::Objectness { classes } => write!(f, "[1, N, {}] layout", 5 + classes),
            OutputLayout::EndToEnd => write!(f, "[1, N, 6] layout"),
        }
    }
}

/// Decode a `[1, 4 + nc, N]` tensor, keeping candidates with best score >= `threshold`.
pub fn decode_channels_first(
    output: &ArrayD<f32>,
    classes: usize,
    threshold: f32,
) -> anyhow::Result<Vec<Candidate>> {
    OutputLayout::ChannelsFirst { classes }.check(output.shape())?;
    let output = output.view().into_dimensionality::<Ix3>()?;
    let output = output.index_axis(Axis(0), 0);

    let mut candidates = Vec::new();
    for column in output.axis_iter(Axis(1)) {
        let Some((cls, conf)) = argmax(column.iter().skip(4).copied()) else {
            continue;
        };
        if conf < threshold {
            continue;
        }
        candidates.push(Candidate {
            xyxy: cxcywh_to_xyxy(column[0], column[1], column[2], column[3]),
            conf,
            cls,
        });
    }
    Ok(candidates)
}

/// Decode a `[1, N, 5 + nc]` tensor; confidence is objectness times the best class score.
pub fn decode_objectness(
    output: &ArrayD<f32>,
    classes: usize,
    threshold: f32,
) -> anyhow::Result<Vec<Candidate>> {
    OutputLayout::Objectness { classes }.check(output.shape())?;
    let output = output.view().into_dimensionality::<Ix3>()?;
    let output = output.index_axis(Axis(0), 0);

    let mut candidates = Vec::new();
    for row in output.axis_iter(Axis(0)) {
        let objectness = row[4];
        if objectness < threshold {
            continue;
        }
        let Some((cls, score)) = argmax(row.iter().skip(5).copied()) else {
            continue;
        };
        let conf = objectness * score;
        if conf < threshold {
            continue;
        }
        candidates.push(Candidate {
            xyxy: cxcywh_to_xyxy(row[0], row[1], row[2], row[3]),
            conf,
            cls,
        });
    }
    Ok(candidates)
}

/// Decode a `[1, N, 6]` tensor into `n x 6` rows mapped back to source pixels.
///
/// Class ids stay as the raw float column; validation happens downstream.
pub fn decode_end_to_end(
    output: &ArrayD<f32>,
    threshold: f32,
    transform: &TransformParams,
) -> anyhow::Result<Array2<f32>> {
    OutputLayout::EndToEnd.check(output.shape())?;
    let output = output.view().into_dimensionality::<Ix3>()?;
    let output = output.index_axis(Axis(0), 0);

    let mut data = Vec::new();
    let mut kept = 0;
    for row in output.axis_iter(Axis(0)) {
        // NaN confidences are kept so the normalizer can count them
        if row[4] < threshold {
            continue;
        }
        let xyxy = transform.to_source([row[0], row[1], row[2], row[3]]);
        data.extend_from_slice(&xyxy);
        data.push(row[4]);
        data.push(row[5]);
        kept += 1;
    }

    Ok(Array2::from_shape_vec((kept, 6), data)?)
}

/// Convert bounding box from center-width-height format to corner format
#[inline]
pub fn cxcywh_to_xyxy(cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

fn argmax(scores: impl Iterator<Item = f32>) -> Option<(usize, f32)> {
    scores
        .enumerate()
        .fold(None, |best, (i, s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};

    #[test]
    fn test_cxcywh_to_xyxy() {
        let [x1, y1, x2, y2] = cxcywh_to_xyxy(50.0, 50.0, 40.0, 20.0);
        assert_eq!((x1, y1, x2, y2), (30.0, 40.0, 70.0, 60.0));
    }

    #[test]
    fn test_layout_check() {
        assert!(OutputLayout::ChannelsFirst { classes: 2 }.check(&[1, 6, 8400]).is_ok());
        assert!(OutputLayout::ChannelsFirst { classes: 2 }.check(&[1, 300, 6]).is_err());
        assert!(OutputLayout::EndToEnd.check(&[1, 300, 6]).is_ok());
        assert!(OutputLayout::Objectness { classes: 2 }.check(&[1, 25200, 7]).is_ok());
        assert!(OutputLayout::Objectness { classes: 2 }.check(&[1, 25200]).is_err());

        let err = OutputLayout::EndToEnd.check(&[2, 300, 6]).unwrap_err();
        assert!(err.to_string().contains("batch size 1"));
    }

    #[test]
    fn test_decode_channels_first_filters_by_best_score() {
        // two anchors, two classes
        let data = vec![
            50.0, 10.0, // cx
            50.0, 10.0, // cy
            20.0, 4.0, // w
            20.0, 4.0, // h
            0.1, 0.05, // class 0
            0.8, 0.1, // class 1
        ];
        let output = Array::from_shape_vec(IxDyn(&[1, 6, 2]), data).unwrap();

        let candidates = decode_channels_first(&output, 2, 0.25).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].cls, 1);
        assert_eq!(candidates[0].conf, 0.8);
        assert_eq!(candidates[0].xyxy, [40.0, 40.0, 60.0, 60.0]);
    }

    #[test]
    fn test_decode_objectness_multiplies_scores() {
        let data = vec![
            50.0, 50.0, 20.0, 20.0, 0.9, 0.2, 0.5, //
            10.0, 10.0, 4.0, 4.0, 0.1, 0.9, 0.1,
        ];
        let output = Array::from_shape_vec(IxDyn(&[1, 2, 7]), data).unwrap();

        let candidates = decode_objectness(&output, 2, 0.25).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].cls, 1);
        assert!((candidates[0].conf - 0.45).abs() < 1e-6);
    }

    #[test]
    fn test_decode_end_to_end_rescales_rows() {
        let transform = TransformParams {
            orig_width: 800,
            orig_height: 600,
            input_width: 640,
            input_height: 640,
            scale: 0.8,
            offset_x: 0.0,
            offset_y: 80.0,
        };
        let data = vec![
            80.0, 160.0, 160.0, 240.0, 0.9, 1.0, //
            0.0, 0.0, 10.0, 10.0, 0.1, 0.0,
        ];
        let output = Array::from_shape_vec(IxDyn(&[1, 2, 6]), data).unwrap();

        let rows = decode_end_to_end(&output, 0.25, &transform).unwrap();
        assert_eq!(rows.shape(), &[1, 6]);
        assert_eq!(rows.row(0).to_vec(), vec![100.0, 100.0, 200.0, 200.0, 0.9, 1.0]);
    }

    #[test]
    fn test_argmax_prefers_first_on_ties() {
        assert_eq!(argmax([0.5, 0.5, 0.1].into_iter()), Some((0, 0.5)));
        assert_eq!(argmax(std::iter::empty()), None);
    }
}
