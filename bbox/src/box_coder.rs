use super::{Rect, TLBR};
use crate::common::*;

/// The anchor-relative box parameterization.
///
/// A box is encoded against an anchor as
/// `(wx·Δcx/aw, wy·Δcy/ah, ww·ln(w/aw), wh·ln(h/ah))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxCoder {
    /// The `(wx, wy, ww, wh)` scaling weights.
    pub weights: [f64; 4],
    /// The upper bound of `dw` and `dh` applied before exponentiation.
    pub bbox_xform_clip: f64,
}

impl BoxCoder {
    pub fn new(weights: [f64; 4]) -> Result<Self> {
        ensure!(
            weights.iter().all(|&weight| weight.is_finite() && weight > 0.0),
            "box coder weights must be positive finite numbers"
        );
        Ok(Self {
            weights,
            ..Default::default()
        })
    }

    /// Encode a target box against an anchor.
    pub fn encode<R1, R2>(&self, target: &R1, anchor: &R2) -> Result<[f64; 4]>
    where
        R1: Rect<Type = f64>,
        R2: Rect<Type = f64>,
    {
        let [wx, wy, ww, wh] = self.weights;
        let (aw, ah) = (anchor.w(), anchor.h());
        ensure!(
            aw > 0.0 && ah > 0.0,
            "anchor must have positive width and height"
        );
        let (gw, gh) = (target.w(), target.h());
        ensure!(
            gw >= 0.0 && gh >= 0.0,
            "target must have non-negative width and height"
        );

        let dx = wx * (target.cx() - anchor.cx()) / aw;
        let dy = wy * (target.cy() - anchor.cy()) / ah;
        let dw = ww * (gw / aw).ln();
        let dh = wh * (gh / ah).ln();

        Ok([dx, dy, dw, dh])
    }

    /// Decode an encoded box against an anchor.
    ///
    /// The output always satisfies `x2 >= x1` and `y2 >= y1`.
    pub fn decode<R>(&self, codes: [f64; 4], anchor: &R) -> TLBR<f64>
    where
        R: Rect<Type = f64>,
    {
        let [wx, wy, ww, wh] = self.weights;
        let [dx, dy, dw, dh] = codes;
        let (aw, ah) = (anchor.w(), anchor.h());

        let dw = (dw / ww).min(self.bbox_xform_clip);
        let dh = (dh / wh).min(self.bbox_xform_clip);

        let cx = dx / wx * aw + anchor.cx();
        let cy = dy / wy * ah + anchor.cy();
        let w = dw.exp() * aw;
        let h = dh.exp() * ah;

        let l = cx - w / 2.0;
        let t = cy - h / 2.0;
        let r = (cx + w / 2.0).max(l);
        let b = (cy + h / 2.0).max(t);

        TLBR { t, l, b, r }
    }
}

impl Default for BoxCoder {
    fn default() -> Self {
        Self {
            weights: [10.0, 10.0, 5.0, 5.0],
            bbox_xform_clip: (1000.0f64 / 16.0).ln(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rect::{Rect, RectNum};
    use approx::assert_abs_diff_eq;
    use rand::prelude::*;

    #[test]
    fn encode_decode_round_trip() -> Result<()> {
        let mut rng = rand::thread_rng();
        let coder = BoxCoder::default();

        for _ in 0..10000 {
            let anchor = {
                let x1 = rng.gen_range(-200.0..200.0);
                let y1 = rng.gen_range(-200.0..200.0);
                let w = rng.gen_range(1.0..128.0);
                let h = rng.gen_range(1.0..128.0);
                TLBR::from_xyxy([x1, y1, x1 + w, y1 + h])
            };
            let target = {
                let x1 = anchor.l() + rng.gen_range(-64.0..64.0);
                let y1 = anchor.t() + rng.gen_range(-64.0..64.0);
                let w = anchor.w() * rng.gen_range(0.1..8.0);
                let h = anchor.h() * rng.gen_range(0.1..8.0);
                TLBR::from_xyxy([x1, y1, x1 + w, y1 + h])
            };

            let codes = coder.encode(&target, &anchor)?;
            let decoded = coder.decode(codes, &anchor);

            for (lhs, rhs) in decoded.xyxy().iter().zip(target.xyxy().iter()) {
                assert_abs_diff_eq!(lhs, rhs, epsilon = 1e-6);
            }
        }

        Ok(())
    }

    #[test]
    fn decode_is_well_formed() {
        let coder = BoxCoder::default();
        let anchor = TLBR::from_xyxy([0.0, 0.0, 16.0, 16.0]);

        for codes in [
            [0.0, 0.0, -1e6, -1e6],
            [1e3, -1e3, 1e6, 1e6],
            [0.0, 0.0, f64::MIN, 0.0],
        ] {
            let decoded = coder.decode(codes, &anchor);
            assert!(decoded.r() >= decoded.l());
            assert!(decoded.b() >= decoded.t());
            assert!(decoded.w().is_finite() && decoded.h().is_finite());
        }
    }

    #[test]
    fn reject_degenerate_anchor() {
        let coder = BoxCoder::default();
        let anchor = TLBR::from_xyxy([0.0, 0.0, 0.0, 16.0]);
        let target = TLBR::from_xyxy([0.0, 0.0, 8.0, 8.0]);
        assert!(coder.encode(&target, &anchor).is_err());
    }
}
