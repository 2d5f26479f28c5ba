use crate::backend::RawDetectionOutput;
use crate::error::MalformedDetection;
use crate::names::ClassNameTable;
use crate::record::{BoundingBox, DetectionRecord};
use chrono::{DateTime, Utc};

/// Records that passed validation, plus why the rest were dropped.
#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    pub records: Vec<DetectionRecord>,
    pub dropped: Vec<MalformedDetection>,
}

/// Convert a backend's raw output into uniform detection records.
///
/// Boxes are clipped to the source image. Rows with an unknown class id,
/// a confidence outside `[0, 1]`, or a non-finite or inverted box are dropped.
pub fn normalize(raw: &RawDetectionOutput, names: &ClassNameTable) -> NormalizeOutcome {
    let (height, width) = raw.orig_shape();
    let now = Utc::now();
    let mut outcome = NormalizeOutcome::default();

    let mut accept = |tuple: Result<(usize, f32, [f32; 4]), MalformedDetection>| {
        match tuple.and_then(|(cls, conf, xyxy)| build(cls, conf, xyxy, names, width, height, now)) {
            Ok(record) => outcome.records.push(record),
            Err(reason) => {
                tracing::debug!(variant = %raw.variant(), %reason, "Dropping malformed detection");
                outcome.dropped.push(reason);
            }
        }
    };

    match raw {
        RawDetectionOutput::Primary(result) => {
            for b in &result.boxes {
                accept(Ok((b.cls, b.conf, b.xyxy)));
            }
        }
        RawDetectionOutput::Hub(output) => {
            for row in output.rows.rows() {
                accept(if row.len() < 6 {
                    Err(MalformedDetection::ShortRow(row.len()))
                } else {
                    class_index(row[5]).map(|cls| (cls, row[4], [row[0], row[1], row[2], row[3]]))
                });
            }
        }
        RawDetectionOutput::Local(output) => {
            for d in &output.detections {
                accept(Ok((d.cls, d.conf, d.xyxy)));
            }
        }
    }

    outcome
}

fn class_index(raw: f32) -> Result<usize, MalformedDetection> {
    if raw.is_finite() && raw >= 0.0 && raw.fract() == 0.0 && raw <= u32::MAX as f32 {
        Ok(raw as usize)
    } else {
        Err(MalformedDetection::InvalidClassId(raw))
    }
}

fn build(
    cls: usize,
    conf: f32,
    xyxy: [f32; 4],
    names: &ClassNameTable,
    width: u32,
    height: u32,
    timestamp: DateTime<Utc>,
) -> Result<DetectionRecord, MalformedDetection> {
    if !conf.is_finite() || !(0.0..=1.0).contains(&conf) {
        return Err(MalformedDetection::InvalidConfidence(conf));
    }

    let bbox = BoundingBox::from_xyxy(xyxy);
    if !bbox.is_finite() {
        return Err(MalformedDetection::NonFiniteBox(xyxy));
    }
    if bbox.is_degenerate() {
        return Err(MalformedDetection::DegenerateBox(xyxy));
    }

    let class_name = names.get(cls).ok_or(MalformedDetection::UnknownClass(cls))?;

    Ok(DetectionRecord::new(
        class_name.to_string(),
        conf,
        bbox.clamp_to(width, height),
        timestamp,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HubOutput, LocalDetection, LocalOutput, PrimaryBox, PrimaryResult};
    use crate::processing::TransformParams;
    use ndarray::Array2;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn names() -> ClassNameTable {
        ClassNameTable::Sequence(vec!["soldier".into(), "civilian".into()])
    }

    fn hub(rows: Vec<[f32; 6]>) -> RawDetectionOutput {
        let n = rows.len();
        let data = rows.into_iter().flatten().collect();
        RawDetectionOutput::Hub(HubOutput {
            rows: Array2::from_shape_vec((n, 6), data).unwrap(),
            orig_shape: (100, 200),
        })
    }

    #[test]
    fn test_valid_hub_rows_become_records() {
        let outcome = normalize(&hub(vec![[10.0, 20.0, 50.0, 60.0, 0.9, 1.0]]), &names());
        assert!(outcome.dropped.is_empty());
        assert_eq!(outcome.records.len(), 1);

        let record = &outcome.records[0];
        assert_eq!(record.class_name(), "civilian");
        assert_eq!(record.confidence(), 0.9);
        assert_eq!(record.bbox(), BoundingBox::from_xyxy([10.0, 20.0, 50.0, 60.0]));
    }

    #[test]
    fn test_unknown_class_is_dropped() {
        let outcome = normalize(
            &hub(vec![
                [10.0, 20.0, 50.0, 60.0, 0.9, 9999.0],
                [10.0, 20.0, 50.0, 60.0, 0.9, 0.0],
            ]),
            &names(),
        );
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.dropped, vec![MalformedDetection::UnknownClass(9999)]);
    }

    #[test]
    fn test_malformed_rows_are_dropped_with_reasons() {
        let outcome = normalize(
            &hub(vec![
                [10.0, 20.0, 50.0, 60.0, f32::NAN, 0.0],
                [10.0, 20.0, 50.0, 60.0, 1.5, 0.0],
                [f32::INFINITY, 20.0, 50.0, 60.0, 0.5, 0.0],
                [50.0, 20.0, 10.0, 60.0, 0.5, 0.0],
                [10.0, 20.0, 50.0, 60.0, 0.5, 1.5],
                [10.0, 20.0, 50.0, 60.0, 0.5, -1.0],
            ]),
            &names(),
        );
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.dropped.len(), 6);
        assert!(matches!(outcome.dropped[0], MalformedDetection::InvalidConfidence(_)));
        assert_eq!(outcome.dropped[1], MalformedDetection::InvalidConfidence(1.5));
        assert!(matches!(outcome.dropped[2], MalformedDetection::NonFiniteBox(_)));
        assert!(matches!(outcome.dropped[3], MalformedDetection::DegenerateBox(_)));
        assert_eq!(outcome.dropped[4], MalformedDetection::InvalidClassId(1.5));
        assert_eq!(outcome.dropped[5], MalformedDetection::InvalidClassId(-1.0));
    }

    #[test]
    fn test_short_hub_rows_are_dropped() {
        let raw = RawDetectionOutput::Hub(HubOutput {
            rows: Array2::zeros((1, 5)),
            orig_shape: (10, 10),
        });
        let outcome = normalize(&raw, &names());
        assert_eq!(outcome.dropped, vec![MalformedDetection::ShortRow(5)]);
    }

    #[test]
    fn test_boxes_are_clipped_to_source_image() {
        let outcome = normalize(&hub(vec![[-5.0, 10.0, 250.0, 120.0, 0.5, 0.0]]), &names());
        assert_eq!(
            outcome.records[0].bbox(),
            BoundingBox::from_xyxy([0.0, 10.0, 200.0, 100.0])
        );
    }

    #[test]
    fn test_sequence_and_mapping_tables_agree() {
        let mapping = ClassNameTable::Mapping(BTreeMap::from([
            (0, "soldier".to_string()),
            (1, "civilian".to_string()),
        ]));
        let raw = hub(vec![[1.0, 1.0, 5.0, 5.0, 0.7, 1.0]]);

        let from_seq = normalize(&raw, &names());
        let from_map = normalize(&raw, &mapping);
        assert_eq!(from_seq.records[0].class_name(), from_map.records[0].class_name());
    }

    #[test]
    fn test_variants_agree_on_identical_detection() {
        let xyxy = [12.5, 30.25, 80.0, 99.75];
        let conf = 0.8125;
        let table = Arc::new(names());

        let primary = RawDetectionOutput::Primary(PrimaryResult {
            boxes: vec![PrimaryBox { cls: 1, conf, xyxy }],
            orig_shape: (100, 200),
            names: Arc::clone(&table),
        });
        let hub = hub(vec![[xyxy[0], xyxy[1], xyxy[2], xyxy[3], conf, 1.0]]);
        let local = RawDetectionOutput::Local(LocalOutput {
            detections: vec![LocalDetection { xyxy, conf, cls: 1 }],
            transform: TransformParams::identity(200, 100),
        });

        let records: Vec<DetectionRecord> = [primary, hub, local]
            .iter()
            .map(|raw| normalize(raw, &table).records.remove(0))
            .collect();

        for record in &records[1..] {
            assert_eq!(record.class_name(), records[0].class_name());
            assert_eq!(record.confidence().to_bits(), records[0].confidence().to_bits());
            assert_eq!(<[f32; 4]>::from(record.bbox()), <[f32; 4]>::from(records[0].bbox()));
        }
    }
}
