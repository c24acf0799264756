use crate::{common::*, error::PaaError};

/// The assignment state of an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnchorLabel {
    /// Foreground of the 1-based class id.
    Positive(usize),
    /// Background.
    Negative,
    /// Excluded from the classification loss.
    Ignored,
}

impl AnchorLabel {
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Positive(_))
    }

    pub fn class_id(&self) -> Option<usize> {
        match *self {
            Self::Positive(class_id) => Some(class_id),
            _ => None,
        }
    }

    /// The integer code: the class id for positives, `0` for negatives and `-1` for ignored.
    pub fn to_code(&self) -> i64 {
        match *self {
            Self::Positive(class_id) => class_id as i64,
            Self::Negative => 0,
            Self::Ignored => -1,
        }
    }

    /// Build an `[n]` int64 tensor of label codes.
    pub fn to_tensor(labels: &[Self], device: Device) -> Tensor {
        let codes: Vec<i64> = labels.iter().map(|label| label.to_code()).collect();
        Tensor::of_slice(&codes).to_device(device)
    }
}

impl Default for AnchorLabel {
    fn default() -> Self {
        Self::Negative
    }
}

/// A ground-truth box with its 1-based class id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledBox {
    pub bbox: TLBR<f64>,
    pub class: usize,
}

impl LabeledBox {
    /// Build from corner form `[x1, y1, x2, y2]`.
    pub fn new(xyxy: [f64; 4], class: usize) -> Result<Self> {
        ensure!(
            xyxy.iter().all(|value| value.is_finite()),
            PaaError::invalid_argument(format!("non-finite box coordinates {:?}", xyxy))
        );
        ensure!(
            class >= 1,
            PaaError::invalid_argument("class ids of ground truth boxes start from 1")
        );
        let bbox = TLBR::try_from_xyxy(xyxy)
            .map_err(|err| PaaError::invalid_argument(format!("{}: {:?}", err, xyxy)))?;
        Ok(Self { bbox, class })
    }

    /// Stack the boxes into a `[n, 4]` corner-form tensor.
    pub fn to_xyxy_tensor(boxes: &[Self], kind: Kind, device: Device) -> Tensor {
        let values: Vec<f64> = boxes.iter().flat_map(|bbox| bbox.bbox.xyxy()).collect();
        Tensor::of_slice(&values)
            .view([boxes.len() as i64, 4])
            .to_kind(kind)
            .to_device(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_codes() {
        let labels = [
            AnchorLabel::Positive(3),
            AnchorLabel::Negative,
            AnchorLabel::Ignored,
        ];
        let codes: Vec<i64> = labels.iter().map(AnchorLabel::to_code).collect();
        assert_eq!(codes, vec![3, 0, -1]);
        assert_eq!(labels[0].class_id(), Some(3));
        assert!(!labels[1].is_positive());
    }

    #[test]
    fn reject_malformed_boxes() {
        assert!(LabeledBox::new([0.0, 0.0, 4.0, 4.0], 1).is_ok());
        assert!(LabeledBox::new([0.0, 0.0, 4.0, 4.0], 0).is_err());
        assert!(LabeledBox::new([4.0, 0.0, 0.0, 4.0], 1).is_err());
        assert!(LabeledBox::new([0.0, f64::NAN, 4.0, 4.0], 1).is_err());
    }
}
