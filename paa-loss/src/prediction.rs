//! The per-level outputs of the detection head and their flattened form.

use crate::{
    box_list::{cat_box_lists, BoxList, BoxMode},
    common::*,
    error::PaaError,
};

/// Raw head outputs, one tensor per pyramid level.
#[derive(Debug, TensorLike)]
pub struct HeadOutputs {
    /// Classification logits in shape `(N, A·C, H, W)`.
    pub cls_logits: Vec<Tensor>,
    /// Box regression codes in shape `(N, A·4, H, W)`.
    pub box_regression: Vec<Tensor>,
    /// IoU-quality logits in shape `(N, A, H, W)`.
    pub iou_pred: Option<Vec<Tensor>>,
}

/// The shape of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelShape {
    pub height: i64,
    pub width: i64,
}

/// Head outputs flattened across levels.
///
/// Rows are ordered by image, then level, row, column and anchor, matching the concatenated
/// anchors of each image.
#[derive(Debug, TensorLike, Getters, CopyGetters)]
pub struct FlatPredictions {
    /// Logits in shape `[N·M, C]`.
    #[get = "pub"]
    cls_logits: Tensor,
    /// Codes in shape `[N·M, 4]`.
    #[get = "pub"]
    box_regression: Tensor,
    /// IoU-quality logits in shape `[N·M]`.
    #[get = "pub"]
    iou_pred: Option<Tensor>,
    #[tensor_like(copy)]
    #[get_copy = "pub"]
    batch_size: i64,
    #[tensor_like(copy)]
    #[get_copy = "pub"]
    num_classes: i64,
    #[tensor_like(copy)]
    #[get_copy = "pub"]
    anchors_per_location: i64,
    /// The `H·W·A` anchor count of each level.
    #[tensor_like(clone)]
    #[get = "pub"]
    level_sizes: Vec<i64>,
    #[tensor_like(clone)]
    #[get = "pub"]
    level_shapes: Vec<LevelShape>,
}

impl FlatPredictions {
    /// The number of anchors `M` of each image.
    pub fn anchors_per_image(&self) -> i64 {
        self.level_sizes.iter().sum()
    }

    pub fn num_levels(&self) -> usize {
        self.level_sizes.len()
    }

    pub fn device(&self) -> Device {
        self.cls_logits.device()
    }

    /// Check the per-level anchors of every image against the predictions and concatenate
    /// them into one corner-form list per image on the prediction device.
    pub fn merge_anchors(&self, anchors: &[Vec<BoxList>]) -> Result<Vec<BoxList>> {
        ensure!(
            anchors.len() as i64 == self.batch_size,
            PaaError::shape_mismatch(format!(
                "expect anchors of {} images, but get {}",
                self.batch_size,
                anchors.len()
            ))
        );

        anchors
            .iter()
            .enumerate()
            .map(|(image, levels)| {
                ensure!(
                    levels.len() == self.num_levels(),
                    PaaError::shape_mismatch(format!(
                        "image {} has anchors of {} levels, but predictions have {}",
                        image,
                        levels.len(),
                        self.num_levels()
                    ))
                );
                for (level, (list, &size)) in izip!(levels, &self.level_sizes).enumerate() {
                    ensure!(
                        list.len() == size,
                        PaaError::shape_mismatch(format!(
                            "image {} level {} has {} anchors, but predictions have {}",
                            image,
                            level,
                            list.len(),
                            size
                        ))
                    );
                }
                let merged = cat_box_lists(levels)?.convert(BoxMode::Xyxy)?;
                Ok(merged.to_device(self.device()))
            })
            .collect()
    }
}

impl HeadOutputs {
    pub fn num_levels(&self) -> usize {
        self.cls_logits.len()
    }

    /// Validate the per-level shapes and flatten them into rows of anchors.
    pub fn flatten(&self) -> Result<FlatPredictions> {
        let Self {
            cls_logits,
            box_regression,
            iou_pred,
        } = self;
        let num_levels = cls_logits.len();

        ensure!(
            num_levels > 0,
            PaaError::shape_mismatch("head outputs have no pyramid level")
        );
        ensure!(
            box_regression.len() == num_levels,
            PaaError::shape_mismatch(format!(
                "{} classification levels but {} regression levels",
                num_levels,
                box_regression.len()
            ))
        );
        if let Some(iou_pred) = iou_pred {
            ensure!(
                iou_pred.len() == num_levels,
                PaaError::shape_mismatch(format!(
                    "{} classification levels but {} IoU-quality levels",
                    num_levels,
                    iou_pred.len()
                ))
            );
        }

        let (batch_size, reg_channels, _, _) = size4(&box_regression[0], "box regression")?;
        ensure!(
            reg_channels > 0 && reg_channels % 4 == 0,
            PaaError::shape_mismatch(format!(
                "box regression channels must be a positive multiple of 4, but get {}",
                reg_channels
            ))
        );
        let anchors_per_location = reg_channels / 4;
        let (_, cls_channels, _, _) = size4(&cls_logits[0], "classification")?;
        ensure!(
            cls_channels > 0 && cls_channels % anchors_per_location == 0,
            PaaError::shape_mismatch(format!(
                "classification channels {} is not a multiple of {} anchors per location",
                cls_channels, anchors_per_location
            ))
        );
        let num_classes = cls_channels / anchors_per_location;

        let mut level_shapes = vec![];
        for (level, (cls, reg)) in cls_logits.iter().zip(box_regression).enumerate() {
            let cls_shape = size4(cls, "classification")?;
            let reg_shape = size4(reg, "box regression")?;
            let (_, _, height, width) = cls_shape;
            ensure!(
                cls_shape == (batch_size, cls_channels, height, width)
                    && reg_shape == (batch_size, reg_channels, height, width),
                PaaError::shape_mismatch(format!(
                    "level {} has classification shape {:?} and regression shape {:?}, \
                     expect ({}, {}, H, W) and ({}, {}, H, W)",
                    level,
                    cls.size(),
                    reg.size(),
                    batch_size,
                    cls_channels,
                    batch_size,
                    reg_channels
                ))
            );
            if let Some(iou_pred) = iou_pred {
                let iou_shape = size4(&iou_pred[level], "IoU-quality")?;
                ensure!(
                    iou_shape == (batch_size, anchors_per_location, height, width),
                    PaaError::shape_mismatch(format!(
                        "level {} has IoU-quality shape {:?}, expect {:?}",
                        level,
                        iou_pred[level].size(),
                        (batch_size, anchors_per_location, height, width)
                    ))
                );
            }
            level_shapes.push(LevelShape { height, width });
        }

        let level_sizes: Vec<i64> = level_shapes
            .iter()
            .map(|shape| shape.height * shape.width * anchors_per_location)
            .collect();

        let flatten_levels = |tensors: &[Tensor], entries: i64| -> Result<Tensor> {
            let levels: Vec<Tensor> = tensors
                .iter()
                .map(|tensor| {
                    permute_and_flatten(tensor, batch_size, anchors_per_location, entries)
                })
                .collect::<Result<_>>()?;
            Ok(Tensor::f_cat(&levels, 1)?.f_view([-1, entries])?)
        };

        let cls_logits = flatten_levels(cls_logits.as_slice(), num_classes)?;
        let box_regression = flatten_levels(box_regression.as_slice(), 4)?;
        let iou_pred = iou_pred
            .as_ref()
            .map(|iou_pred| -> Result<_> {
                Ok(flatten_levels(iou_pred.as_slice(), 1)?.f_view([-1])?)
            })
            .transpose()?;

        Ok(FlatPredictions {
            cls_logits,
            box_regression,
            iou_pred,
            batch_size,
            num_classes,
            anchors_per_location,
            level_sizes,
            level_shapes,
        })
    }
}

fn size4(tensor: &Tensor, name: &str) -> Result<(i64, i64, i64, i64)> {
    tensor.size4().map_err(|_| {
        PaaError::shape_mismatch(format!(
            "{} output must be 4-dimensional, but get shape {:?}",
            name,
            tensor.size()
        ))
        .into()
    })
}

/// Reorder `(N, A·K, H, W)` into `(N, H·W·A, K)`.
fn permute_and_flatten(
    tensor: &Tensor,
    batch_size: i64,
    anchors: i64,
    entries: i64,
) -> Result<Tensor> {
    let (_, _, height, width) = tensor.size4()?;
    let tensor = tensor
        .f_view([batch_size, anchors, entries, height, width])?
        .f_permute(&[0, 3, 4, 1, 2])?
        .f_contiguous()?
        .f_view([batch_size, -1, entries])?;
    Ok(tensor)
}
