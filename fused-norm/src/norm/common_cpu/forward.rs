use super::{
    super::{
        args::Meta,
        estimator::{reduce_row, Layer, Rms, Strategy},
        Args, Norm, NormMode,
    },
    get, put,
};
use crate::{
    common_cpu::Cpu, get_static, strides_not_support, type_not_support, ByteOf, LaunchError,
    MaybeDyn, QueueAlloc, SchemeError,
};
use digit_layout::types as ty;
use half::{bf16, f16};
use num_traits::{real::Real, NumCast, ToPrimitive};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::ops::AddAssign;

pub struct Forward;

impl Norm<Cpu> for Forward {}

impl crate::Operator for Forward {
    type Hardware = Cpu;
    type TopoNode = Cpu;
    type Args = Args<Cpu>;

    #[inline]
    fn new(_node: &Self::TopoNode) -> Self {
        Self
    }

    #[inline]
    fn scheme(
        &mut self,
        args: &Self::Args,
        _max_workspace_size: usize,
    ) -> Result<usize, SchemeError> {
        let _meta = args.meta()?;
        Ok(0)
    }

    fn launch<QA>(
        &self,
        args: &Self::Args,
        _workspace: &mut [ByteOf<Self::Hardware>],
        _queue_alloc: &QA,
    ) -> Result<(), LaunchError>
    where
        QA: QueueAlloc<Hardware = Self::Hardware>,
    {
        let Meta {
            dt_a, dt_w, n, d, ..
        } = args.meta()?;
        let Args {
            mode,
            y_layout,
            y_base,
            x_layout,
            x_base,
            scale_layout,
            scale_base,
            bias_layout,
            bias_base,
            mean_layout,
            mean_base,
            inv_std_layout,
            inv_std_base,
            epsilon,
        } = args;

        let &[yns, yds] = y_layout.strides() else {
            unreachable!()
        };
        let &[xns, xds] = x_layout.strides() else {
            unreachable!()
        };
        let &[sns] = inv_std_layout.strides() else {
            unreachable!()
        };
        let mns = match mode {
            NormMode::Layer => {
                let &[mns] = mean_layout.strides() else {
                    unreachable!()
                };
                mns
            }
            NormMode::Rms => MaybeDyn::from(0isize),
        };

        get_static! {
             n   d
            yns yds
            xns xds
            sns mns
        }

        let unit_a = dt_a.nbytes() as isize;
        let unit_w = dt_w.nbytes() as isize;
        if yds != unit_w || xds != unit_a {
            return Err(strides_not_support("rows must be contiguous").into());
        }
        if !scale_base.is_null() {
            let &[ds] = scale_layout.strides() else {
                unreachable!()
            };
            get_static!(ds);
            if ds != unit_w {
                return Err(strides_not_support("scale must be contiguous").into());
            }
        }
        if !bias_base.is_null() {
            let &[ds] = bias_layout.strides() else {
                unreachable!()
            };
            get_static!(ds);
            if ds != unit_w {
                return Err(strides_not_support("bias must be contiguous").into());
            }
        }

        macro_rules! calculate {
            ($w:ty, $a:ty, $x:ty) => {{
                let scheme = Scheme::<$x, $a, $w> {
                    n,
                    d,
                    yns,
                    xns,
                    mns,
                    sns,
                    epsilon: <$x as NumCast>::from(*epsilon).unwrap(),
                    y: y_base.cast::<$w>(),
                    x: x_base.cast::<$a>(),
                    scale: scale_base.cast::<$w>(),
                    bias: bias_base.cast::<$w>(),
                    mean: mean_base.cast::<$x>(),
                    inv_std: inv_std_base.cast::<$x>(),
                };
                match mode {
                    NormMode::Layer => scheme.compute::<Layer>(),
                    NormMode::Rms => scheme.compute::<Rms>(),
                }
            }};
        }

        match (dt_w, dt_a) {
            (ty::F16, ty::F16) => calculate!(f16, f16, f32),
            (ty::F16, ty::BF16) => calculate!(f16, bf16, f32),
            (ty::F16, ty::F32) => calculate!(f16, f32, f32),
            (ty::F16, ty::F64) => calculate!(f16, f64, f64),
            (ty::BF16, ty::F16) => calculate!(bf16, f16, f32),
            (ty::BF16, ty::BF16) => calculate!(bf16, bf16, f32),
            (ty::BF16, ty::F32) => calculate!(bf16, f32, f32),
            (ty::BF16, ty::F64) => calculate!(bf16, f64, f64),
            (ty::F32, ty::F16) => calculate!(f32, f16, f32),
            (ty::F32, ty::BF16) => calculate!(f32, bf16, f32),
            (ty::F32, ty::F32) => calculate!(f32, f32, f32),
            (ty::F32, ty::F64) => calculate!(f32, f64, f64),
            (ty::F64, ty::F16) => calculate!(f64, f16, f32),
            (ty::F64, ty::BF16) => calculate!(f64, bf16, f32),
            (ty::F64, ty::F32) => calculate!(f64, f32, f32),
            (ty::F64, ty::F64) => calculate!(f64, f64, f64),
            (_, _) => {
                return Err(type_not_support(format!(
                    "unsupported combination: weight {dt_w:?}, input {dt_a:?}"
                ))
                .into())
            }
        }

        Ok(())
    }
}

struct Scheme<X, Ta, Tw> {
    n: usize,
    d: usize,
    yns: isize,
    xns: isize,
    mns: isize,
    sns: isize,
    epsilon: X,
    y: *mut Tw,
    x: *const Ta,
    scale: *const Tw,
    bias: *const Tw,
    mean: *mut X,
    inv_std: *mut X,
}

impl<X, Ta, Tw> Scheme<X, Ta, Tw>
where
    X: Real + AddAssign + Send + Sync,
    Ta: ToPrimitive + Copy + Send + Sync,
    Tw: NumCast + ToPrimitive + Copy + Send + Sync,
{
    fn compute<M: Strategy<X>>(self) {
        let Self {
            n,
            d,
            yns,
            xns,
            mns,
            sns,
            epsilon,
            ..
        } = self;
        let y = self.y as isize;
        let x = self.x as isize;
        let scale = self.scale as isize;
        let bias = self.bias as isize;
        let mean = self.mean as isize;
        let inv_std = self.inv_std as isize;

        // 行间并行；行内归约形状固定，与调度无关
        (0..n as isize).into_par_iter().for_each(|i| {
            let x_row = (x + i * xns) as *const Ta;
            let y_row = (y + i * yns) as *mut Tw;
            let scale = scale as *const Tw;
            let bias = bias as *const Tw;

            let acc: M::Acc = reduce_row(0, d, &|j| get(x_row, j));
            let stats = M::stats(acc, epsilon);

            // 每行恰好一个写入者负责统计量
            unsafe { ((inv_std + i * sns) as *mut X).write(stats.inv_std) };
            if M::CENTERED {
                unsafe { ((mean + i * mns) as *mut X).write(stats.mean) };
            }

            for j in 0..d {
                let mut v = M::normalize(get(x_row, j), &stats);
                if !scale.is_null() {
                    v = v * get::<X, Tw>(scale, j);
                }
                if !bias.is_null() {
                    v = v + get::<X, Tw>(bias, j);
                }
                put(y_row, j, v);
            }
        });
    }
}

#[cfg(test)]
pub(super) fn run_f64(
    mode: NormMode,
    n: usize,
    d: usize,
    x: &[f64],
    scale: Option<&[f64]>,
    bias: Option<&[f64]>,
    epsilon: f32,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    use crate::{common_cpu::ThisThread, Operator as _, TensorLayout};
    use std::ptr::{null, null_mut};

    assert_eq!(x.len(), n * d);
    let mut y = vec![0.; n * d];
    let mut mean = vec![0.; n];
    let mut inv_std = vec![0.; n];

    let arr = TensorLayout::new_contiguous(ty::F64, &[n, d]);
    let vec_ = TensorLayout::new_contiguous(ty::F64, &[d]);
    let col = TensorLayout::new_contiguous(ty::F64, &[n]);
    let args = Args {
        mode,
        y_layout: arr.clone(),
        y_base: y.as_mut_ptr().cast(),
        x_layout: arr,
        x_base: x.as_ptr().cast(),
        scale_layout: vec_.clone(),
        scale_base: scale.map_or(null(), |s| s.as_ptr().cast()),
        bias_layout: vec_,
        bias_base: bias.map_or(null(), |b| b.as_ptr().cast()),
        mean_layout: col.clone(),
        mean_base: match mode {
            NormMode::Layer => mean.as_mut_ptr().cast(),
            NormMode::Rms => null_mut(),
        },
        inv_std_layout: col,
        inv_std_base: inv_std.as_mut_ptr().cast(),
        epsilon,
    };
    Forward
        .launch(&args, &mut [], &ThisThread)
        .unwrap();
    (y, mean, inv_std)
}
