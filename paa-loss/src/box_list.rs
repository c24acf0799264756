use crate::{common::*, error::PaaError};

/// The coordinate layout of the rows of a [BoxList].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr)]
pub enum BoxMode {
    /// Corner form `(x1, y1, x2, y2)`.
    Xyxy,
    /// Corner and size `(x1, y1, w, h)`.
    Xywh,
}

/// A set of boxes of one image, such as the anchors of one pyramid level.
#[derive(Debug, Getters, CopyGetters)]
pub struct BoxList {
    /// The boxes in shape `[n, 4]`.
    #[get = "pub"]
    bbox: Tensor,
    /// The image size `(width, height)`.
    #[get_copy = "pub"]
    image_size: (i64, i64),
    #[get_copy = "pub"]
    mode: BoxMode,
}

impl BoxList {
    pub fn new(bbox: Tensor, image_size: (i64, i64), mode: BoxMode) -> Result<Self> {
        match bbox.size().as_slice() {
            &[_, 4] => (),
            shape => bail!(PaaError::shape_mismatch(format!(
                "box list expects a [n, 4] tensor, but get {:?}",
                shape
            ))),
        }
        Ok(Self {
            bbox,
            image_size,
            mode,
        })
    }

    pub fn from_xyxy(bbox: Tensor, image_size: (i64, i64)) -> Result<Self> {
        Self::new(bbox, image_size, BoxMode::Xyxy)
    }

    pub fn len(&self) -> i64 {
        self.bbox.size()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn device(&self) -> Device {
        self.bbox.device()
    }

    pub fn to_device(&self, device: Device) -> Self {
        Self {
            bbox: self.bbox.to_device(device),
            image_size: self.image_size,
            mode: self.mode,
        }
    }

    /// Convert the rows to another mode. Widths and heights are `x2 − x1` and `y2 − y1`.
    pub fn convert(&self, mode: BoxMode) -> Result<Self> {
        let bbox = match (self.mode, mode) {
            (from, to) if from == to => self.bbox.shallow_clone(),
            (BoxMode::Xyxy, BoxMode::Xywh) => {
                let xy = self.bbox.f_narrow(1, 0, 2)?;
                let wh = self.bbox.f_narrow(1, 2, 2)? - &xy;
                Tensor::f_cat(&[xy, wh], 1)?
            }
            (BoxMode::Xywh, BoxMode::Xyxy) => {
                let xy = self.bbox.f_narrow(1, 0, 2)?;
                let x2y2 = &xy + self.bbox.f_narrow(1, 2, 2)?;
                Tensor::f_cat(&[xy, x2y2], 1)?
            }
            _ => unreachable!(),
        };

        Ok(Self {
            bbox,
            image_size: self.image_size,
            mode,
        })
    }

    /// The boxes in corner form.
    pub fn xyxy(&self) -> Result<Tensor> {
        Ok(self.convert(BoxMode::Xyxy)?.bbox)
    }

    /// Compute the `[n, m]` IoU matrix against the boxes of the same image.
    pub fn pairwise_iou_with(&self, other: &Self) -> Result<Tensor> {
        ensure!(
            self.image_size == other.image_size,
            PaaError::invalid_argument(format!(
                "box lists of different images: {:?} vs {:?}",
                self.image_size, other.image_size
            ))
        );
        let lhs = TLBRTensor::from_xyxy(&self.xyxy()?)?;
        let rhs = TLBRTensor::from_xyxy(&other.xyxy()?)?;
        Ok(lhs.pairwise_iou_with(&rhs))
    }
}

/// Concatenate box lists of one image into one list in the input order.
///
/// The lists must share the image size and the mode.
pub fn cat_box_lists<B>(lists: impl IntoIterator<Item = B>) -> Result<BoxList>
where
    B: Borrow<BoxList>,
{
    let lists: Vec<B> = lists.into_iter().collect();
    let first = lists
        .first()
        .ok_or_else(|| PaaError::invalid_argument("cannot concatenate zero box lists"))?
        .borrow();
    let image_size = first.image_size;
    let mode = first.mode;

    let tensors: Vec<&Tensor> = lists
        .iter()
        .map(|list| {
            let list = list.borrow();
            ensure!(
                list.image_size == image_size && list.mode == mode,
                PaaError::invalid_argument(format!(
                    "cannot concatenate box lists of {:?} in {} mode with {:?} in {} mode",
                    image_size,
                    mode.as_ref(),
                    list.image_size,
                    list.mode.as_ref()
                ))
            );
            Ok(&list.bbox)
        })
        .collect::<Result<_>>()?;

    BoxList::new(Tensor::f_cat(&tensors, 0)?, image_size, mode)
}
