use crate::{common::*, tlbr_tensor::TLBRTensor};
use bbox::BoxCoder;

/// Batched encoding and decoding of `[n, 4]` box tensors with a [BoxCoder].
pub trait BoxCoderTensorExt {
    /// Encode `[n, 4]` target boxes against `[n, 4]` anchors into `[n, 4]` codes.
    fn f_encode_tensor(&self, targets: &Tensor, anchors: &Tensor) -> Result<Tensor>;

    /// Decode `[n, 4]` codes against `[n, 4]` anchors into `[n, 4]` corner-form boxes.
    fn f_decode_tensor(&self, codes: &Tensor, anchors: &Tensor) -> Result<Tensor>;

    fn encode_tensor(&self, targets: &Tensor, anchors: &Tensor) -> Tensor {
        self.f_encode_tensor(targets, anchors).unwrap()
    }

    fn decode_tensor(&self, codes: &Tensor, anchors: &Tensor) -> Tensor {
        self.f_decode_tensor(codes, anchors).unwrap()
    }
}

impl BoxCoderTensorExt for BoxCoder {
    fn f_encode_tensor(&self, targets: &Tensor, anchors: &Tensor) -> Result<Tensor> {
        ensure!(
            targets.size() == anchors.size(),
            "targets and anchors shape mismatch: {:?} vs {:?}",
            targets.size(),
            anchors.size()
        );
        let [wx, wy, ww, wh] = self.weights;
        let target = TLBRTensor::from_xyxy(targets)?;
        let anchor = TLBRTensor::from_xyxy(anchors)?;

        let (aw, ah) = (anchor.w(), anchor.h());
        let dx = (target.cx() - anchor.cx()) * wx / &aw;
        let dy = (target.cy() - anchor.cy()) * wy / &ah;
        let dw = (target.w() / &aw).f_log()? * ww;
        let dh = (target.h() / &ah).f_log()? * wh;

        Ok(Tensor::f_cat(&[dx, dy, dw, dh], 1)?)
    }

    fn f_decode_tensor(&self, codes: &Tensor, anchors: &Tensor) -> Result<Tensor> {
        ensure!(
            codes.size() == anchors.size(),
            "codes and anchors shape mismatch: {:?} vs {:?}",
            codes.size(),
            anchors.size()
        );
        let (_num, entries) = codes.size2()?;
        ensure!(entries == 4, "expect [n, 4] codes, but get {:?}", codes.size());

        let [wx, wy, ww, wh] = self.weights;
        let anchor = TLBRTensor::from_xyxy(anchors)?;
        let codes = codes.to_kind(anchors.kind());

        let dx = codes.f_narrow(1, 0, 1)? / wx;
        let dy = codes.f_narrow(1, 1, 1)? / wy;
        let dw = (codes.f_narrow(1, 2, 1)? / ww).clamp_max(self.bbox_xform_clip);
        let dh = (codes.f_narrow(1, 3, 1)? / wh).clamp_max(self.bbox_xform_clip);

        let (aw, ah) = (anchor.w(), anchor.h());
        let cx = dx * &aw + anchor.cx();
        let cy = dy * &ah + anchor.cy();
        let half_w = dw.exp() * &aw * 0.5;
        let half_h = dh.exp() * &ah * 0.5;

        let x1 = &cx - &half_w;
        let y1 = &cy - &half_h;
        let x2 = (cx + half_w).maximum(&x1);
        let y2 = (cy + half_h).maximum(&y1);

        Ok(Tensor::f_cat(&[x1, y1, x2, y2], 1)?)
    }
}
