use crate::common::*;

const EPSILON: f64 = 1e-12;

/// Checked tensor of batched box parameters in TLBR format.
///
/// Built from and converted back to the `[n, 4]` corner layout `(x1, y1, x2, y2)`.
#[derive(Debug, TensorLike, Getters)]
pub struct TLBRTensor {
    /// The top parameter in shape `[n, 1]`.
    #[get = "pub"]
    pub(crate) t: Tensor,
    /// The left parameter in shape `[n, 1]`.
    #[get = "pub"]
    pub(crate) l: Tensor,
    /// The bottom parameter in shape `[n, 1]`.
    #[get = "pub"]
    pub(crate) b: Tensor,
    /// The right parameter in shape `[n, 1]`.
    #[get = "pub"]
    pub(crate) r: Tensor,
}

impl TLBRTensor {
    /// Split a `[n, 4]` tensor of `(x1, y1, x2, y2)` rows.
    pub fn from_xyxy(xyxy: &Tensor) -> Result<Self> {
        let (_num, entries) = xyxy.size2()?;
        ensure!(
            entries == 4,
            "expect a [n, 4] box tensor, but get shape {:?}",
            xyxy.size()
        );
        Ok(Self {
            l: xyxy.f_narrow(1, 0, 1)?,
            t: xyxy.f_narrow(1, 1, 1)?,
            r: xyxy.f_narrow(1, 2, 1)?,
            b: xyxy.f_narrow(1, 3, 1)?,
        })
    }

    /// Merge into a `[n, 4]` tensor of `(x1, y1, x2, y2)` rows.
    pub fn to_xyxy(&self) -> Tensor {
        let Self { t, l, b, r } = self;
        Tensor::cat(&[l, t, r, b], 1)
    }

    pub fn num_samples(&self) -> i64 {
        self.t.size()[0]
    }

    pub fn h(&self) -> Tensor {
        &self.b - &self.t
    }

    pub fn w(&self) -> Tensor {
        &self.r - &self.l
    }

    pub fn cy(&self) -> Tensor {
        (&self.t + &self.b) * 0.5
    }

    pub fn cx(&self) -> Tensor {
        (&self.l + &self.r) * 0.5
    }

    /// Compute the box area.
    pub fn area(&self) -> Tensor {
        self.h() * self.w()
    }

    /// Compute the elementwise intersection area with the other box tensor.
    ///
    /// Disjoint pairs get exactly zero area.
    pub fn intersect_area_with(&self, other: &Self) -> Tensor {
        let Self {
            t: lhs_t,
            l: lhs_l,
            b: lhs_b,
            r: lhs_r,
        } = self;
        let Self {
            t: rhs_t,
            l: rhs_l,
            b: rhs_b,
            r: rhs_r,
        } = other;

        let max_t = lhs_t.maximum(rhs_t);
        let max_l = lhs_l.maximum(rhs_l);
        let min_b = lhs_b.minimum(rhs_b);
        let min_r = lhs_r.minimum(rhs_r);

        let inner_h = (min_b - max_t).clamp_min(0.0);
        let inner_w = (min_r - max_l).clamp_min(0.0);

        inner_h * inner_w
    }

    /// Compute the elementwise rectangle closure with the other box tensor.
    pub fn closure_with(&self, other: &Self) -> Self {
        let Self {
            t: lhs_t,
            l: lhs_l,
            b: lhs_b,
            r: lhs_r,
        } = self;
        let Self {
            t: rhs_t,
            l: rhs_l,
            b: rhs_b,
            r: rhs_r,
        } = other;

        Self {
            t: lhs_t.minimum(rhs_t),
            l: lhs_l.minimum(rhs_l),
            b: lhs_b.maximum(rhs_b),
            r: lhs_r.maximum(rhs_r),
        }
    }

    /// Compute the elementwise IoU in shape `[n, 1]`.
    ///
    /// Zero-area and disjoint pairs yield zero.
    pub fn iou_with(&self, other: &Self) -> Tensor {
        let inter_area = self.intersect_area_with(other);
        let union_area = self.area() + other.area() - &inter_area;
        inter_area / union_area.clamp_min(EPSILON)
    }

    /// Compute the elementwise generalized IoU in shape `[n, 1]`.
    ///
    /// `epsilon` is added to both the union and the enclosing area.
    pub fn giou_with(&self, other: &Self, epsilon: f64) -> Tensor {
        let inter_area = self.intersect_area_with(other);
        let union_area = self.area() + other.area() - &inter_area + epsilon;
        let closure_area = self.closure_with(other).area() + epsilon;
        let iou = &inter_area / &union_area;
        iou - (&closure_area - &union_area) / &closure_area
    }

    /// Compute the `[n, m]` IoU matrix of every pair between `self` and `other`.
    pub fn pairwise_iou_with(&self, other: &Self) -> Tensor {
        let transpose = |tensor: &Tensor| tensor.transpose(0, 1);

        let max_t = self.t.maximum(&transpose(&other.t));
        let max_l = self.l.maximum(&transpose(&other.l));
        let min_b = self.b.minimum(&transpose(&other.b));
        let min_r = self.r.minimum(&transpose(&other.r));

        let inner_h = (min_b - max_t).clamp_min(0.0);
        let inner_w = (min_r - max_l).clamp_min(0.0);
        let inter_area = inner_h * inner_w;

        let union_area = self.area() + transpose(&other.area()) - &inter_area;
        inter_area / union_area.clamp_min(EPSILON)
    }
}
