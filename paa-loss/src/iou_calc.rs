//! IoU-quality targets of decoded predictions, for training or inspecting the IoU head.

use crate::{
    box_list::BoxList,
    common::*,
    error::PaaError,
    label::LabeledBox,
    prediction::HeadOutputs,
};

/// Computes the best IoU of every decoded prediction against the ground truths of its image.
#[derive(Debug, Clone)]
pub struct IouTargetCalculator {
    box_coder: BoxCoder,
}

impl IouTargetCalculator {
    pub fn new(box_coder: BoxCoder) -> Self {
        Self { box_coder }
    }

    /// Produce one `(N, A, H, W)` IoU tensor per pyramid level.
    ///
    /// Anchors of images without ground truths get zero.
    pub fn forward(
        &self,
        outputs: &HeadOutputs,
        anchors: &[Vec<BoxList>],
        targets: &[Vec<LabeledBox>],
    ) -> Result<Vec<Tensor>> {
        let flat = outputs.flatten()?;
        ensure!(
            targets.len() as i64 == flat.batch_size(),
            PaaError::shape_mismatch(format!(
                "expect targets of {} images, but get {}",
                flat.batch_size(),
                targets.len()
            ))
        );
        let anchors = flat.merge_anchors(anchors)?;
        let kind = flat.box_regression().kind();
        let device = flat.device();
        let num_anchors = flat.anchors_per_image();

        tch::no_grad(|| -> Result<_> {
            let image_ious: Vec<Tensor> = izip!(0.., &anchors, targets)
                .map(|(image, anchors, targets)| -> Result<_> {
                    if targets.is_empty() {
                        return Ok(Tensor::zeros(&[num_anchors], (kind, device)));
                    }

                    let anchors_xyxy = anchors.bbox().to_kind(kind);
                    let codes = flat
                        .box_regression()
                        .f_narrow(0, image * num_anchors, num_anchors)?
                        .detach();
                    let pred = BoxList::from_xyxy(
                        self.box_coder.f_decode_tensor(&codes, &anchors_xyxy)?,
                        anchors.image_size(),
                    )?;
                    let gt = BoxList::from_xyxy(
                        LabeledBox::to_xyxy_tensor(targets, kind, device),
                        anchors.image_size(),
                    )?;
                    let (max_ious, _) = pred.pairwise_iou_with(&gt)?.max_dim(1, false);
                    Ok(max_ious)
                })
                .collect::<Result<_>>()?;
            let ious = Tensor::f_stack(&image_ious, 0)?;

            let mut offset = 0;
            let levels = izip!(flat.level_shapes(), flat.level_sizes())
                .map(|(shape, &size)| -> Result<_> {
                    let level = ious
                        .f_narrow(1, offset, size)?
                        .f_reshape(&[
                            flat.batch_size(),
                            shape.height,
                            shape.width,
                            flat.anchors_per_location(),
                        ])?
                        .f_permute(&[0, 3, 1, 2])?
                        .f_contiguous()?;
                    offset += size;
                    Ok(level)
                })
                .collect::<Result<_>>()?;
            Ok(levels)
        })
    }
}
