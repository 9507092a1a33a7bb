use crate::{
    args_not_support, type_mismatch, type_not_support,
    utils::{dim_distinct, rank_error, type_distinct},
    ConstPtr, Hardware, MaybeDyn, MutPtr, SchemeError, TensorLayout,
};
use digit_layout::{types as ty, DigitLayout};

/// 归一化模式。
///
/// [Layer](NormMode::Layer) 对行中心化并可附加缩放和平移；
/// [Rms](NormMode::Rms) 只按均方根缩放，不产生均值，也不支持平移。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NormMode {
    Layer,
    Rms,
}

/// 前向参数。
///
/// `scale_base` 与 `bias_base` 允许为空指针，表示相应参数不存在；
/// Rms 模式下 `bias_base` 必须为空，`mean_layout`/`mean_base` 被完全忽略。
pub struct Args<H: Hardware> {
    pub mode: NormMode,

    pub y_layout: TensorLayout,
    pub y_base: MutPtr<H>,
    pub x_layout: TensorLayout,
    pub x_base: ConstPtr<H>,
    pub scale_layout: TensorLayout,
    pub scale_base: ConstPtr<H>,
    pub bias_layout: TensorLayout,
    pub bias_base: ConstPtr<H>,
    pub mean_layout: TensorLayout,
    pub mean_base: MutPtr<H>,
    pub inv_std_layout: TensorLayout,
    pub inv_std_base: MutPtr<H>,

    pub epsilon: f32,
}

/// 反向参数。
///
/// `mean_base`/`inv_std_base` 是前向保存的统计量。
/// `scale_base` 为空时整个参数梯度阶段被跳过，`dscale_base`/`dbias_base` 也必须为空。
pub struct GradArgs<H: Hardware> {
    pub mode: NormMode,

    pub dx_layout: TensorLayout,
    pub dx_base: MutPtr<H>,
    pub dscale_layout: TensorLayout,
    pub dscale_base: MutPtr<H>,
    pub dbias_layout: TensorLayout,
    pub dbias_base: MutPtr<H>,

    pub dy_layout: TensorLayout,
    pub dy_base: ConstPtr<H>,
    pub x_layout: TensorLayout,
    pub x_base: ConstPtr<H>,
    pub scale_layout: TensorLayout,
    pub scale_base: ConstPtr<H>,
    pub mean_layout: TensorLayout,
    pub mean_base: ConstPtr<H>,
    pub inv_std_layout: TensorLayout,
    pub inv_std_base: ConstPtr<H>,

    /// 参数梯度第一阶段的分段数，即部分梯度缓冲的行数。
    pub part_rows: usize,
}

pub(super) struct Meta {
    pub dt_a: DigitLayout,
    pub dt_w: DigitLayout,
    pub dt_s: DigitLayout,
    pub n: MaybeDyn<usize>,
    pub d: MaybeDyn<usize>,
}

/// 16 种合法组合：激活与权重各自取 F16/BF16/F32/F64。
fn float_only(dt: DigitLayout) -> Result<DigitLayout, SchemeError> {
    match dt {
        ty::F16 | ty::BF16 | ty::F32 | ty::F64 => Ok(dt),
        _ => Err(type_not_support(format!("{dt:?} not supported"))),
    }
}

/// 累加与统计量存储类型：输入为 F64 时用 F64，其余提升到 F32。
#[inline]
fn acc_type(dt_a: DigitLayout) -> DigitLayout {
    if dt_a == ty::F64 {
        ty::F64
    } else {
        ty::F32
    }
}

impl<H: Hardware> Args<H> {
    pub(super) fn meta(&self) -> Result<Meta, SchemeError> {
        let Self {
            mode,
            y_layout: y,
            x_layout: x,
            scale_layout: scale,
            scale_base,
            bias_layout: bias,
            bias_base,
            mean_layout: mean,
            inv_std_layout: inv_std,
            ..
        } = self;

        let &[ny, dy] = y.shape() else {
            return Err(rank_error("y", 2, y.ndim()));
        };
        let &[nx, dx] = x.shape() else {
            return Err(rank_error("x", 2, x.ndim()));
        };
        let &[nr] = inv_std.shape() else {
            return Err(rank_error("inv_std", 1, inv_std.ndim()));
        };

        let dt_a = float_only(x.dt())?;
        let dt_s = acc_type(dt_a);
        if inv_std.dt() != dt_s {
            return Err(type_mismatch(format!(
                "inv_std: {:?}, accumulation type {dt_s:?} expected",
                inv_std.dt()
            )));
        }

        let mut w_types = vec![y.dt()];
        let mut n_dims = vec![ny, nx, nr];
        let mut d_dims = vec![dy, dx];

        if !scale_base.is_null() {
            let &[ds] = scale.shape() else {
                return Err(rank_error("scale", 1, scale.ndim()));
            };
            w_types.push(scale.dt());
            d_dims.push(ds);
        }

        match mode {
            NormMode::Layer => {
                if !bias_base.is_null() {
                    let &[db] = bias.shape() else {
                        return Err(rank_error("bias", 1, bias.ndim()));
                    };
                    w_types.push(bias.dt());
                    d_dims.push(db);
                }
                let &[nm] = mean.shape() else {
                    return Err(rank_error("mean", 1, mean.ndim()));
                };
                if mean.dt() != dt_s {
                    return Err(type_mismatch(format!(
                        "mean: {:?}, accumulation type {dt_s:?} expected",
                        mean.dt()
                    )));
                }
                n_dims.push(nm);
            }
            NormMode::Rms => {
                // mean 缓冲即使非空也不读不写
                if !bias_base.is_null() {
                    return Err(args_not_support("rms mode has no bias"));
                }
            }
        }

        Ok(Meta {
            dt_a,
            dt_w: float_only(type_distinct(&w_types)?)?,
            dt_s,
            n: dim_distinct(&n_dims)?,
            d: dim_distinct(&d_dims)?,
        })
    }
}

impl<H: Hardware> GradArgs<H> {
    pub(super) fn meta(&self) -> Result<Meta, SchemeError> {
        let Self {
            mode,
            dx_layout: dx,
            dscale_layout: dscale,
            dscale_base,
            dbias_layout: dbias,
            dbias_base,
            dy_layout: dy,
            x_layout: x,
            scale_layout: scale,
            scale_base,
            mean_layout: mean,
            inv_std_layout: inv_std,
            part_rows,
            ..
        } = self;

        if *part_rows == 0 {
            return Err(args_not_support("partial gradient row count must be positive"));
        }

        let &[ndx, ddx] = dx.shape() else {
            return Err(rank_error("dx", 2, dx.ndim()));
        };
        let &[ndy, ddy] = dy.shape() else {
            return Err(rank_error("dy", 2, dy.ndim()));
        };
        let &[nx, dx_] = x.shape() else {
            return Err(rank_error("x", 2, x.ndim()));
        };
        let &[nr] = inv_std.shape() else {
            return Err(rank_error("inv_std", 1, inv_std.ndim()));
        };

        let dt_a = float_only(type_distinct(&[x.dt(), dx.dt()])?)?;
        let dt_s = acc_type(dt_a);
        if inv_std.dt() != dt_s {
            return Err(type_mismatch(format!(
                "inv_std: {:?}, accumulation type {dt_s:?} expected",
                inv_std.dt()
            )));
        }

        let mut w_types = vec![dy.dt()];
        let mut n_dims = vec![ndx, ndy, nx, nr];
        let mut d_dims = vec![ddx, ddy, dx_];

        if scale_base.is_null() {
            // 无缩放参数时整个参数梯度组件被跳过，这是配置而非错误
            if !dscale_base.is_null() || !dbias_base.is_null() {
                return Err(args_not_support("parameter gradients require scale"));
            }
        } else {
            let &[ds] = scale.shape() else {
                return Err(rank_error("scale", 1, scale.ndim()));
            };
            if dscale_base.is_null() {
                return Err(args_not_support("dscale missing while scale is present"));
            }
            let &[dds] = dscale.shape() else {
                return Err(rank_error("dscale", 1, dscale.ndim()));
            };
            w_types.extend([scale.dt(), dscale.dt()]);
            d_dims.extend([ds, dds]);

            if !dbias_base.is_null() {
                if *mode != NormMode::Layer {
                    return Err(args_not_support("rms mode has no bias gradient"));
                }
                let &[ddb] = dbias.shape() else {
                    return Err(rank_error("dbias", 1, dbias.ndim()));
                };
                w_types.push(dbias.dt());
                d_dims.push(ddb);
            }
        }

        if let NormMode::Layer = mode {
            let &[nm] = mean.shape() else {
                return Err(rank_error("mean", 1, mean.ndim()));
            };
            if mean.dt() != dt_s {
                return Err(type_mismatch(format!(
                    "mean: {:?}, accumulation type {dt_s:?} expected",
                    mean.dt()
                )));
            }
            n_dims.push(nm);
        }

        Ok(Meta {
            dt_a,
            dt_w: float_only(type_distinct(&w_types)?)?,
            dt_s,
            n: dim_distinct(&n_dims)?,
            d: dim_distinct(&d_dims)?,
        })
    }
}
