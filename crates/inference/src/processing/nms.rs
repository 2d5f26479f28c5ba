use super::post::Candidate;

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 { intersection / union } else { 0.0 }
}

/// Class-aware greedy NMS: boxes of different classes never suppress each other.
///
/// Keeps at most `max_det` boxes, highest confidence first.
pub fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    max_det: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.conf.total_cmp(&a.conf));

    let mut suppressed = vec![false; candidates.len()];
    let mut keep = Vec::new();

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(candidates[i]);
        if keep.len() == max_det {
            break;
        }

        for j in (i + 1)..candidates.len() {
            if !suppressed[j]
                && candidates[j].cls == candidates[i].cls
                && iou(&candidates[i].xyxy, &candidates[j].xyxy) > iou_threshold
            {
                suppressed[j] = true;
            }
        }
    }

    keep
}
