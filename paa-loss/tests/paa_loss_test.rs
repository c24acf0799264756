use anyhow::{ensure, Result};
use approx::assert_abs_diff_eq;
use bbox::{prelude::*, BoxCoder, TLBR};
use paa_loss::{
    AnchorLabel, BoxList, HeadOutputs, LabeledBox, PaaError, PaaLoss, PaaLossInit, RegLossKind,
    Reducer,
};
use std::sync::Arc;
use tch::{Device, Kind, Tensor};

const IMAGE_SIZE: (i64, i64) = (64, 64);

const ROW_ANCHORS: [[f64; 4]; 4] = [
    [0.0, 0.0, 10.0, 10.0],
    [1.0, 0.0, 11.0, 10.0],
    [2.0, 0.0, 12.0, 10.0],
    [50.0, 50.0, 60.0, 60.0],
];

/// Four anchors in a 1x4 single-level grid.
fn row_anchors() -> Result<Vec<BoxList>> {
    let values: Vec<f32> = ROW_ANCHORS
        .iter()
        .flatten()
        .map(|&value| value as f32)
        .collect();
    Ok(vec![BoxList::from_xyxy(
        Tensor::of_slice(&values).view([4, 4]),
        IMAGE_SIZE,
    )?])
}

/// Outputs of `batch_size` images with 2 classes on a 1x4 grid.
fn head_outputs(batch_size: i64, with_iou_pred: bool) -> HeadOutputs {
    let box_regression = Tensor::full(&[batch_size, 4, 1, 4], 0.5, (Kind::Float, Device::Cpu));
    head_outputs_with_regression(box_regression, with_iou_pred)
}

/// Outputs with the given `[N, 4, 1, 4]` box codes.
fn head_outputs_with_regression(box_regression: Tensor, with_iou_pred: bool) -> HeadOutputs {
    let batch_size = box_regression.size()[0];
    let cls_logits = Tensor::zeros(&[batch_size, 2, 1, 4], (Kind::Float, Device::Cpu))
        .set_requires_grad(true);
    let box_regression = box_regression.set_requires_grad(true);
    let iou_pred = with_iou_pred.then(|| {
        vec![Tensor::zeros(&[batch_size, 1, 1, 4], (Kind::Float, Device::Cpu))
            .set_requires_grad(true)]
    });
    HeadOutputs {
        cls_logits: vec![cls_logits],
        box_regression: vec![box_regression],
        iou_pred,
    }
}

fn paa_error(err: &anyhow::Error) -> Option<&PaaError> {
    err.downcast_ref::<PaaError>()
}

#[test]
fn assign_single_object() -> Result<()> {
    let _ = pretty_env_logger::try_init();

    let loss_fn = PaaLossInit::default().build()?;
    let outputs = head_outputs(1, true);
    let targets = vec![vec![LabeledBox::new([0.0, 0.0, 10.0, 10.0], 1)?]];
    let (output, aux) = loss_fn.forward(&outputs, &[row_anchors()?], &targets)?;

    let labels = &aux.labels[0];
    ensure!(labels[0] == AnchorLabel::Positive(1), "get {:?}", labels);
    ensure!(labels[3] == AnchorLabel::Negative);
    ensure!(labels
        .iter()
        .all(|label| matches!(label, AnchorLabel::Positive(1) | AnchorLabel::Negative)));
    ensure!(aux.gt_indexes[0][0] == Some(0));
    ensure!(aux.gt_indexes[0][3].is_none());
    ensure!(aux.num_pos >= 1 && aux.num_pos <= 3);
    ensure!(aux.num_pos_avg == aux.num_pos as f64);
    ensure!(aux.reg_norm > 0.0);

    // the IoU sum of decoded predictions against their targets
    let coder = BoxCoder::default();
    let gt = TLBR::from_xyxy([0.0, 0.0, 10.0, 10.0]);
    let expect_norm: f64 = ROW_ANCHORS
        .iter()
        .zip(&aux.gt_indexes[0])
        .filter(|(_, gt_index)| **gt_index == Some(0))
        .map(|(anchor, _)| {
            coder
                .decode([0.5; 4], &TLBR::from_xyxy(*anchor))
                .iou_with(&gt)
        })
        .sum();
    ensure!(expect_norm > 0.0);
    assert_abs_diff_eq!(aux.reg_norm, expect_norm, epsilon = 1e-4);

    let loss_cls = f64::from(&output.loss_cls);
    let loss_reg = f64::from(&output.loss_reg);
    ensure!(loss_cls.is_finite() && loss_cls > 0.0);
    ensure!(loss_reg.is_finite() && loss_reg > 0.0);
    let loss_iou = output
        .loss_iou_pred
        .as_ref()
        .map(f64::from)
        .ok_or_else(|| anyhow::format_err!("the IoU-quality loss is missing"))?;
    ensure!(loss_iou.is_finite() && loss_iou > 0.0);

    output.total_loss().backward();
    ensure!(outputs.cls_logits[0].grad().defined());
    ensure!(outputs.box_regression[0].grad().defined());
    Ok(())
}

#[test]
fn disjoint_predictions_fall_back_to_positive_count() -> Result<()> {
    let _ = pretty_env_logger::try_init();

    // dx codes shift every prediction 100 anchor widths away
    let mut codes = vec![0.0f32; 16];
    codes[..4].fill(1e3);
    let box_regression = Tensor::of_slice(&codes).view([1, 4, 1, 4]);
    let outputs = head_outputs_with_regression(box_regression, true);

    let loss_fn = PaaLossInit::default().build()?;
    let targets = vec![vec![LabeledBox::new([0.0, 0.0, 10.0, 10.0], 1)?]];
    let (output, aux) = loss_fn.forward(&outputs, &[row_anchors()?], &targets)?;

    ensure!(aux.num_pos >= 1);
    ensure!(aux.reg_norm == aux.num_pos_avg);

    let loss_reg = f64::from(&output.loss_reg);
    ensure!(loss_reg.is_finite() && loss_reg > 0.0, "get {}", loss_reg);
    let loss_iou = output
        .loss_iou_pred
        .as_ref()
        .map(f64::from)
        .ok_or_else(|| anyhow::format_err!("the IoU-quality loss is missing"))?;
    ensure!(loss_iou.is_finite());

    output.total_loss().backward();
    ensure!(outputs.box_regression[0].grad().defined());
    Ok(())
}

#[test]
fn images_without_objects() -> Result<()> {
    let loss_fn = PaaLossInit::default().build()?;
    let outputs = head_outputs(2, true);
    let anchors = vec![row_anchors()?, row_anchors()?];
    let (output, aux) = loss_fn.forward(&outputs, &anchors, &[vec![], vec![]])?;

    ensure!(aux.num_pos == 0);
    ensure!(aux.num_pos_avg == 1.0);
    ensure!(aux
        .labels
        .iter()
        .flatten()
        .all(|label| *label == AnchorLabel::Negative));
    ensure!(f64::from(&output.loss_cls) > 0.0);
    ensure!(f64::from(&output.loss_reg) == 0.0);
    ensure!(output.loss_iou_pred.as_ref().map(f64::from) == Some(0.0));

    output.total_loss().backward();
    ensure!(outputs.box_regression[0].grad().defined());
    Ok(())
}

#[test]
fn one_candidate_per_level() -> Result<()> {
    let loss_fn = PaaLossInit {
        topk: 1,
        ..Default::default()
    }
    .build()?;
    let outputs = head_outputs(1, true);
    let targets = vec![vec![LabeledBox::new([0.0, 0.0, 10.0, 10.0], 2)?]];
    let (_, aux) = loss_fn.forward(&outputs, &[row_anchors()?], &targets)?;

    ensure!(aux.num_pos == 1);
    ensure!(aux.labels[0][0] == AnchorLabel::Positive(2));
    Ok(())
}

#[test]
fn smooth_l1_without_iou_pred() -> Result<()> {
    let loss_fn = PaaLossInit {
        reg_loss_kind: RegLossKind::SmoothL1,
        use_iou_pred: false,
        ..Default::default()
    }
    .build()?;

    // IoU-quality outputs are ignored when disabled
    let outputs = head_outputs(1, true);
    let targets = vec![vec![LabeledBox::new([0.0, 0.0, 10.0, 10.0], 1)?]];
    let (output, aux) = loss_fn.forward(&outputs, &[row_anchors()?], &targets)?;

    ensure!(output.loss_iou_pred.is_none());
    ensure!(aux.reg_norm == aux.num_pos_avg);
    ensure!(f64::from(&output.loss_reg) > 0.0);
    ensure!(output.into_map().len() == 2);
    Ok(())
}

#[test]
fn missing_iou_pred() -> Result<()> {
    let loss_fn = PaaLossInit::default().build()?;
    let outputs = head_outputs(1, false);
    let targets = vec![vec![LabeledBox::new([0.0, 0.0, 10.0, 10.0], 1)?]];
    let err = loss_fn
        .forward(&outputs, &[row_anchors()?], &targets)
        .unwrap_err();
    ensure!(matches!(paa_error(&err), Some(PaaError::InvalidArgument(_))));
    Ok(())
}

#[test]
fn class_out_of_range() -> Result<()> {
    let loss_fn = PaaLossInit::default().build()?;
    let outputs = head_outputs(1, true);
    let targets = vec![vec![LabeledBox::new([0.0, 0.0, 10.0, 10.0], 3)?]];
    let err = loss_fn
        .forward(&outputs, &[row_anchors()?], &targets)
        .unwrap_err();
    ensure!(matches!(paa_error(&err), Some(PaaError::InvalidArgument(_))));
    Ok(())
}

#[test]
fn mismatched_anchors() -> Result<()> {
    let loss_fn = PaaLossInit::default().build()?;
    let outputs = head_outputs(1, true);
    let anchors = vec![vec![BoxList::from_xyxy(
        Tensor::zeros(&[3, 4], (Kind::Float, Device::Cpu)),
        IMAGE_SIZE,
    )?]];
    let err = loss_fn.forward(&outputs, &anchors, &[vec![]]).unwrap_err();
    ensure!(matches!(paa_error(&err), Some(PaaError::ShapeMismatch(_))));
    Ok(())
}

/// Every worker holds the same local values.
#[derive(Debug)]
struct Replicated(usize);

impl Reducer for Replicated {
    fn world_size(&self) -> usize {
        self.0
    }

    fn reduce_sum(&self, value: f64) -> f64 {
        value * self.0 as f64
    }
}

#[test]
fn replicated_workers_agree_with_single_worker() -> Result<()> {
    let targets = vec![vec![LabeledBox::new([0.0, 0.0, 10.0, 10.0], 1)?]];
    let anchors = [row_anchors()?];

    let single: PaaLoss = PaaLossInit::default().build()?;
    let replicated: PaaLoss = PaaLossInit {
        reducer: Arc::new(Replicated(4)),
        ..Default::default()
    }
    .build()?;

    let (lhs, lhs_aux) = single.forward(&head_outputs(1, true), &anchors, &targets)?;
    let (rhs, rhs_aux) = replicated.forward(&head_outputs(1, true), &anchors, &targets)?;

    ensure!(lhs_aux == rhs_aux);
    for (lhs, rhs) in lhs.into_map().values().zip(rhs.into_map().values()) {
        ensure!((f64::from(lhs) - f64::from(rhs)).abs() < 1e-6);
    }
    Ok(())
}
