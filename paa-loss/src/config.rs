use crate::{common::*, error::PaaError, loss::PaaLossInit};

/// The box regression loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr)]
#[serde(try_from = "String", into = "&'static str")]
pub enum RegLossKind {
    /// `1 − GIoU` of the decoded boxes.
    #[strum(serialize = "giou")]
    GIoU,
    /// Smooth L1 on the box codes.
    #[strum(serialize = "smooth_l1")]
    SmoothL1,
}

impl RegLossKind {
    /// The number of loss entries per anchor.
    pub fn entries_per_box(&self) -> i64 {
        match self {
            Self::GIoU => 1,
            Self::SmoothL1 => 4,
        }
    }
}

impl FromStr for RegLossKind {
    type Err = PaaError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let kind = match name {
            "giou" | "iou" => Self::GIoU,
            "smooth_l1" | "smoothl1" => Self::SmoothL1,
            _ => {
                return Err(PaaError::not_implemented(format!(
                    "regression loss type '{}'",
                    name
                )))
            }
        };
        Ok(kind)
    }
}

impl TryFrom<String> for RegLossKind {
    type Error = PaaError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl Default for RegLossKind {
    fn default() -> Self {
        Self::GIoU
    }
}

/// The loss function configuration.
///
/// Omitted options take the defaults of [PaaLossInit].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// The IoU threshold of the initial anchor matching, used as both low and high threshold.
    pub iou_threshold: Option<R64>,
    /// Match every ground truth to its best anchors even below the threshold.
    pub allow_low_quality_matches: Option<bool>,
    /// The number of candidate anchors per ground truth and pyramid level.
    pub topk: Option<usize>,
    pub focal_loss_alpha: Option<R64>,
    pub focal_loss_gamma: Option<R64>,
    /// The choice of box regression loss.
    pub reg_loss_type: Option<RegLossKind>,
    /// The weight factor of box regression loss.
    pub reg_loss_weight: Option<R64>,
    /// The transition point of smooth L1 loss.
    pub smooth_l1_beta: Option<R64>,
    /// The weight factor of IoU-quality loss.
    pub iou_loss_weight: Option<R64>,
    /// Enable the IoU-quality prediction loss.
    pub use_iou_pred: Option<bool>,
    /// The `(wx, wy, ww, wh)` weights of the box coder.
    pub box_coder_weights: Option<[R64; 4]>,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json5_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_json5_str(text: &str) -> Result<Self> {
        let config = json5::from_str(text)?;
        Ok(config)
    }

    pub fn paa_loss_init(&self) -> PaaLossInit {
        let Self {
            iou_threshold,
            allow_low_quality_matches,
            topk,
            focal_loss_alpha,
            focal_loss_gamma,
            reg_loss_type,
            reg_loss_weight,
            smooth_l1_beta,
            iou_loss_weight,
            use_iou_pred,
            box_coder_weights,
        } = *self;

        let mut init = PaaLossInit::default();

        if let Some(iou_threshold) = iou_threshold {
            init.iou_threshold = iou_threshold.raw();
        }
        if let Some(allow_low_quality_matches) = allow_low_quality_matches {
            init.allow_low_quality_matches = allow_low_quality_matches;
        }
        if let Some(topk) = topk {
            init.topk = topk;
        }
        if let Some(focal_loss_alpha) = focal_loss_alpha {
            init.focal_loss_alpha = focal_loss_alpha.raw();
        }
        if let Some(focal_loss_gamma) = focal_loss_gamma {
            init.focal_loss_gamma = focal_loss_gamma.raw();
        }
        if let Some(reg_loss_type) = reg_loss_type {
            init.reg_loss_kind = reg_loss_type;
        }
        if let Some(reg_loss_weight) = reg_loss_weight {
            init.reg_loss_weight = reg_loss_weight.raw();
        }
        if let Some(smooth_l1_beta) = smooth_l1_beta {
            init.smooth_l1_beta = smooth_l1_beta.raw();
        }
        if let Some(iou_loss_weight) = iou_loss_weight {
            init.iou_loss_weight = iou_loss_weight.raw();
        }
        if let Some(use_iou_pred) = use_iou_pred {
            init.use_iou_pred = use_iou_pred;
        }
        if let Some(weights) = box_coder_weights {
            init.box_coder_weights = weights.map(|weight| weight.raw());
        }

        init
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config() -> Result<()> {
        let config = Config::from_json5_str(
            r#"{
                // matcher
                iou_threshold: 0.2,
                topk: 5,
                reg_loss_type: "smoothl1",
                use_iou_pred: false,
                box_coder_weights: [1.0, 1.0, 1.0, 1.0],
            }"#,
        )?;
        let init = config.paa_loss_init();

        ensure!(init.iou_threshold == 0.2);
        ensure!(init.topk == 5);
        ensure!(init.reg_loss_kind == RegLossKind::SmoothL1);
        ensure!(!init.use_iou_pred);
        ensure!(init.box_coder_weights == [1.0; 4]);
        ensure!(init.reg_loss_weight == 1.3);
        ensure!(init.focal_loss_gamma == 2.0);
        Ok(())
    }

    #[test]
    fn empty_config_takes_defaults() -> Result<()> {
        let config = Config::from_json5_str("{}")?;
        ensure!(config == Config::default());
        let init = config.paa_loss_init();
        ensure!(init.reg_loss_kind == RegLossKind::GIoU);
        ensure!(init.topk == 9);
        ensure!(init.use_iou_pred);
        Ok(())
    }

    #[test]
    fn unknown_reg_loss_type() {
        assert_eq!(
            "l2".parse::<RegLossKind>(),
            Err(PaaError::NotImplemented("regression loss type 'l2'".into()))
        );
        assert_eq!("iou".parse::<RegLossKind>(), Ok(RegLossKind::GIoU));

        let result = Config::from_json5_str(r#"{ reg_loss_type: "l2" }"#);
        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("not implemented"));
    }

    #[test]
    fn reg_loss_type_names() {
        let name: &'static str = RegLossKind::SmoothL1.into();
        assert_eq!(name, "smooth_l1");
    }
}
