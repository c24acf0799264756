//! The PAA detection loss.

use crate::{
    assign::{ImageAssignment, PaaAssigner},
    box_list::BoxList,
    common::*,
    config::RegLossKind,
    criterion::{ClassificationLoss, RegressionLoss},
    error::PaaError,
    iou_calc::IouTargetCalculator,
    label::{AnchorLabel, LabeledBox},
    matcher::MatcherInit,
    prediction::HeadOutputs,
    profiling::Timing,
    reduce::{Reducer, SingleWorker},
    scorer::AnchorScorer,
    target::{IouBasedTargets, IouTargetPreparer},
};
use tch_modules::{BceWithLogitsLoss, BceWithLogitsLossInit};

#[derive(Debug, Clone)]
pub struct PaaLossInit {
    /// The IoU threshold of the initial anchor matching.
    pub iou_threshold: f64,
    pub allow_low_quality_matches: bool,
    /// The number of candidate anchors per ground truth and pyramid level.
    pub topk: usize,
    pub focal_loss_alpha: f64,
    pub focal_loss_gamma: f64,
    pub reg_loss_kind: RegLossKind,
    pub reg_loss_weight: f64,
    pub smooth_l1_beta: f64,
    pub iou_loss_weight: f64,
    pub use_iou_pred: bool,
    pub box_coder_weights: [f64; 4],
    /// Sums the normalizers across workers.
    pub reducer: Arc<dyn Reducer>,
}

impl Default for PaaLossInit {
    fn default() -> Self {
        Self {
            iou_threshold: 0.1,
            allow_low_quality_matches: true,
            topk: 9,
            focal_loss_alpha: 0.25,
            focal_loss_gamma: 2.0,
            reg_loss_kind: RegLossKind::GIoU,
            reg_loss_weight: 1.3,
            smooth_l1_beta: 1.0 / 9.0,
            iou_loss_weight: 0.5,
            use_iou_pred: true,
            box_coder_weights: [10.0, 10.0, 5.0, 5.0],
            reducer: Arc::new(SingleWorker),
        }
    }
}

impl PaaLossInit {
    pub fn build(self) -> Result<PaaLoss> {
        let Self {
            iou_threshold,
            allow_low_quality_matches,
            topk,
            focal_loss_alpha,
            focal_loss_gamma,
            reg_loss_kind,
            reg_loss_weight,
            smooth_l1_beta,
            iou_loss_weight,
            use_iou_pred,
            box_coder_weights,
            reducer,
        } = self;

        ensure!(
            reg_loss_weight.is_finite() && reg_loss_weight >= 0.0,
            PaaError::invalid_argument(format!(
                "reg_loss_weight must be non-negative, but get {}",
                reg_loss_weight
            ))
        );
        ensure!(
            iou_loss_weight.is_finite() && iou_loss_weight >= 0.0,
            PaaError::invalid_argument(format!(
                "iou_loss_weight must be non-negative, but get {}",
                iou_loss_weight
            ))
        );
        ensure!(
            reducer.world_size() >= 1,
            PaaError::invalid_argument("the reducer must have at least one worker")
        );

        let box_coder = BoxCoder::new(box_coder_weights)
            .map_err(|err| PaaError::invalid_argument(format!("{}", err)))?;
        let matcher = MatcherInit {
            allow_low_quality_matches,
            ..MatcherInit::with_threshold(iou_threshold)
        }
        .build()?;
        let cls_loss = ClassificationLoss::new(focal_loss_alpha, focal_loss_gamma)?;
        let reg_loss = RegressionLoss::new(reg_loss_kind, box_coder, smooth_l1_beta)?;
        let iou_pred_loss = BceWithLogitsLossInit::default(Reduction::Sum).build();
        let assigner = PaaAssigner::new(topk)?;

        Ok(PaaLoss {
            preparer: IouTargetPreparer::new(matcher, box_coder),
            assigner,
            box_coder,
            cls_loss,
            reg_loss,
            iou_pred_loss,
            reg_loss_weight,
            iou_loss_weight,
            use_iou_pred,
            reducer,
        })
    }
}

/// The loss of a PAA detection head.
///
/// Anchors are first matched to ground truths by IoU. Each matched anchor is then scored by
/// the loss of its current predictions, the best scored candidates of every ground truth and
/// level are fitted by a two-component Gaussian mixture, and the low-score component becomes
/// the positives of the final assignment.
#[derive(Debug)]
pub struct PaaLoss {
    preparer: IouTargetPreparer,
    assigner: PaaAssigner,
    box_coder: BoxCoder,
    cls_loss: ClassificationLoss,
    reg_loss: RegressionLoss,
    iou_pred_loss: BceWithLogitsLoss,
    reg_loss_weight: f64,
    iou_loss_weight: f64,
    use_iou_pred: bool,
    reducer: Arc<dyn Reducer>,
}

/// The loss terms of one forward pass.
#[derive(Debug, TensorLike)]
pub struct PaaLossOutput {
    pub loss_cls: Tensor,
    pub loss_reg: Tensor,
    /// Present when the IoU-quality prediction is enabled.
    pub loss_iou_pred: Option<Tensor>,
}

impl PaaLossOutput {
    pub fn total_loss(&self) -> Tensor {
        let Self {
            loss_cls,
            loss_reg,
            loss_iou_pred,
        } = self;
        Tensor::sum_tensors(
            [Some(loss_cls), Some(loss_reg), loss_iou_pred.as_ref()]
                .into_iter()
                .flatten(),
        )
    }

    /// Name the loss terms in order.
    pub fn into_map(self) -> IndexMap<&'static str, Tensor> {
        let Self {
            loss_cls,
            loss_reg,
            loss_iou_pred,
        } = self;
        let mut map = IndexMap::new();
        map.insert("loss_cls", loss_cls);
        map.insert("loss_reg", loss_reg);
        if let Some(loss_iou_pred) = loss_iou_pred {
            map.insert("loss_iou_pred", loss_iou_pred);
        }
        map
    }
}

/// The assignment and the normalizers behind a [PaaLossOutput].
#[derive(Debug, Clone, PartialEq)]
pub struct PaaLossAuxiliary {
    /// The final label of every anchor, per image.
    pub labels: Vec<Vec<AnchorLabel>>,
    /// The ground truth index of every positive anchor, per image.
    pub gt_indexes: Vec<Vec<Option<usize>>>,
    /// The number of positives of this worker.
    pub num_pos: usize,
    /// The positive count averaged over workers, at least one.
    pub num_pos_avg: f64,
    /// The normalizer of the box regression loss.
    pub reg_norm: f64,
}

impl PaaLoss {
    pub fn box_coder(&self) -> &BoxCoder {
        &self.box_coder
    }

    pub fn reg_loss_kind(&self) -> RegLossKind {
        self.reg_loss.kind()
    }

    /// The calculator of IoU-quality targets sharing the box coder of this loss.
    pub fn iou_target_calculator(&self) -> IouTargetCalculator {
        IouTargetCalculator::new(self.box_coder)
    }

    /// Compute the loss.
    ///
    /// `anchors` holds the anchors of every image and level, and `targets` the ground truth
    /// boxes of every image.
    pub fn forward(
        &self,
        outputs: &HeadOutputs,
        anchors: &[Vec<BoxList>],
        targets: &[Vec<LabeledBox>],
    ) -> Result<(PaaLossOutput, PaaLossAuxiliary)> {
        let mut timing = Timing::new("paa_loss");

        let flat = outputs.flatten()?;
        let device = flat.device();
        let kind = flat.box_regression().kind();
        let num_classes = flat.num_classes() as usize;
        let num_anchors = flat.anchors_per_image() as usize;

        ensure!(
            targets.len() as i64 == flat.batch_size(),
            PaaError::shape_mismatch(format!(
                "expect targets of {} images, but get {}",
                flat.batch_size(),
                targets.len()
            ))
        );
        for (image, boxes) in targets.iter().enumerate() {
            if let Some(bbox) = boxes
                .iter()
                .find(|bbox| bbox.class < 1 || bbox.class > num_classes)
            {
                bail!(PaaError::invalid_argument(format!(
                    "image {} has class {} out of range 1..={}",
                    image, bbox.class, num_classes
                )));
            }
        }

        let iou_pred = match (flat.iou_pred(), self.use_iou_pred) {
            (Some(iou_pred), true) => Some(iou_pred),
            (None, true) => bail!(PaaError::invalid_argument(
                "IoU-quality predictions are required when use_iou_pred is enabled"
            )),
            (Some(_), false) => {
                warn!("IoU-quality predictions are ignored because use_iou_pred is disabled");
                None
            }
            (None, false) => None,
        };

        let anchors = flat.merge_anchors(anchors)?;
        let anchors_flat = {
            let tensors: Vec<&Tensor> = anchors.iter().map(|list| list.bbox()).collect();
            Tensor::f_cat(&tensors, 0)?.to_kind(kind)
        };
        timing.add_event("flatten");

        // IoU-based assignment
        let iou_targets: Vec<IouBasedTargets> = izip!(targets, &anchors)
            .map(|(targets, anchors)| self.preparer.prepare(targets, anchors))
            .collect::<Result<_>>()?;
        let num_iou_pos: usize = iou_targets
            .iter()
            .map(|targets| targets.labels.iter().filter(|label| label.is_positive()).count())
            .sum();
        timing.add_event("iou_based_targets");

        // probabilistic anchor assignment
        let assignments: Vec<ImageAssignment> = if num_iou_pos > 0 {
            let iou_labels: Vec<AnchorLabel> = iou_targets
                .iter()
                .flat_map(|targets| targets.labels.iter().copied())
                .collect();
            let reg_targets = {
                let tensors: Vec<&Tensor> =
                    iou_targets.iter().map(|targets| &targets.reg_targets).collect();
                Tensor::f_cat(&tensors, 0)?.to_kind(kind)
            };
            let scores = AnchorScorer {
                cls_loss: &self.cls_loss,
                reg_loss: &self.reg_loss,
            }
            .score(
                flat.cls_logits(),
                flat.box_regression(),
                &anchors_flat,
                &iou_labels,
                &reg_targets,
            )?;
            timing.add_event("score_anchors");

            let level_sizes: Vec<usize> =
                flat.level_sizes().iter().map(|&size| size as usize).collect();
            let assignments = izip!(targets, &iou_targets, scores.chunks(num_anchors))
                .map(|(targets, iou_targets, scores)| {
                    self.assigner.assign_image(
                        targets,
                        &level_sizes,
                        scores,
                        &iou_targets.labels,
                        &iou_targets.matches,
                    )
                })
                .collect::<Result<_>>()?;
            timing.add_event("assign_anchors");
            assignments
        } else {
            debug!("no IoU-based positives, skip the probabilistic assignment");
            iou_targets
                .iter()
                .map(|targets| ImageAssignment {
                    labels: targets.labels.clone(),
                    gt_indexes: vec![None; num_anchors],
                    num_mixture_fits: 0,
                })
                .collect()
        };

        // collect positives
        let (pos_indexes, pos_gt_boxes) = assignments
            .iter()
            .enumerate()
            .flat_map(|(image, assignment)| {
                let targets = &targets[image];
                assignment
                    .gt_indexes
                    .iter()
                    .enumerate()
                    .filter_map(move |(anchor, gt_index)| {
                        let gt_index = (*gt_index)?;
                        Some(((image * num_anchors + anchor) as i64, targets[gt_index]))
                    })
            })
            .unzip_n_vec();
        let num_pos = pos_indexes.len();

        let world_size = self.reducer.world_size() as f64;
        let num_pos_avg = (self.reducer.reduce_sum(num_pos as f64) / world_size).max(1.0);

        // classification loss
        let labels: Vec<AnchorLabel> = assignments
            .iter()
            .flat_map(|assignment| assignment.labels.iter().copied())
            .collect();
        let loss_cls = self
            .cls_loss
            .forward(flat.cls_logits(), &AnchorLabel::to_tensor(&labels, device))?
            .sum(Kind::Float)
            / num_pos_avg;

        // box regression and IoU-quality losses
        let (loss_reg, loss_iou_pred, reg_norm) = if num_pos > 0 {
            let indexes = Tensor::of_slice(&pos_indexes).to_device(device);
            let reg_pred = flat.box_regression().f_index_select(0, &indexes)?;
            let pos_anchors = anchors_flat.f_index_select(0, &indexes)?;
            let gt_boxes = LabeledBox::to_xyxy_tensor(&pos_gt_boxes, kind, device);
            let reg_targets = self.box_coder.f_encode_tensor(&gt_boxes, &pos_anchors)?;

            let (loss_iou_pred, reg_weight, reg_norm) = match iou_pred {
                Some(iou_pred) => {
                    let iou_pred = iou_pred.f_index_select(0, &indexes)?;
                    let ious = tch::no_grad(|| -> Result<_> {
                        let target_boxes =
                            self.box_coder.f_decode_tensor(&reg_targets, &pos_anchors)?;
                        let pred_boxes = self
                            .box_coder
                            .f_decode_tensor(&reg_pred.detach(), &pos_anchors)?;
                        let ious = TLBRTensor::from_xyxy(&target_boxes)?
                            .iou_with(&TLBRTensor::from_xyxy(&pred_boxes)?)
                            .f_view([-1])?
                            .to_kind(iou_pred.kind());
                        Ok(ious)
                    })?;

                    let loss_iou_pred = self.iou_pred_loss.forward(&iou_pred, &ious) / num_pos_avg
                        * self.iou_loss_weight;
                    let sum_ious = self
                        .reducer
                        .reduce_mean(f64::from(ious.sum(Kind::Double)));
                    let reg_norm = if sum_ious > 0.0 {
                        sum_ious
                    } else {
                        warn!(
                            "IoU targets sum to {}, normalize the regression loss by the positive count",
                            sum_ious
                        );
                        num_pos_avg
                    };
                    (Some(loss_iou_pred), Some(ious), reg_norm)
                }
                None => (None, None, num_pos_avg),
            };

            let loss_reg = self
                .reg_loss
                .forward(&reg_pred, &reg_targets, &pos_anchors, reg_weight.as_ref())?
                .sum(Kind::Float)
                / reg_norm
                * self.reg_loss_weight;
            (loss_reg, loss_iou_pred, reg_norm)
        } else {
            // every worker joins the reduction of the IoU sum
            if iou_pred.is_some() {
                let _ = self.reducer.reduce_mean(0.0);
            }
            let loss_reg = flat.box_regression().sum(Kind::Float) * 0.0;
            let loss_iou_pred = iou_pred.map(|iou_pred| iou_pred.sum(Kind::Float) * 0.0);
            (loss_reg, loss_iou_pred, num_pos_avg)
        };
        timing.add_event("compute_losses");

        debug!(
            "{} positives of {} anchors, num_pos_avg = {}, reg_norm = {}",
            num_pos,
            labels.len(),
            num_pos_avg,
            reg_norm
        );
        timing.report();

        let output = PaaLossOutput {
            loss_cls,
            loss_reg,
            loss_iou_pred,
        };
        let (labels, gt_indexes) = assignments
            .into_iter()
            .map(|assignment| (assignment.labels, assignment.gt_indexes))
            .unzip_n_vec();
        let auxiliary = PaaLossAuxiliary {
            labels,
            gt_indexes,
            num_pos,
            num_pos_avg,
            reg_norm,
        };

        Ok((output, auxiliary))
    }
}
