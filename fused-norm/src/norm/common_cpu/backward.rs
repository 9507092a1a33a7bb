use super::{
    super::{
        args::Meta,
        estimator::{Layer, Rms, RowStats, Strategy, LEAF},
        GradArgs, NormBackward, NormMode,
    },
    get, put,
};
use crate::{
    common_cpu::Cpu, get_static, strides_not_support, type_not_support, ByteOf, LaunchError,
    MaybeDyn, QueueAlloc, SchemeError, Workspace,
};
use digit_layout::types as ty;
use half::{bf16, f16};
use num_traits::{real::Real, NumCast, ToPrimitive};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::ops::AddAssign;

pub struct Backward;

impl NormBackward<Cpu> for Backward {}

impl crate::Operator for Backward {
    type Hardware = Cpu;
    type TopoNode = Cpu;
    type Args = GradArgs<Cpu>;

    #[inline]
    fn new(_node: &Self::TopoNode) -> Self {
        Self
    }

    fn scheme(
        &mut self,
        args: &Self::Args,
        max_workspace_size: usize,
    ) -> Result<usize, SchemeError> {
        let Meta { dt_s, n, d, .. } = args.meta()?;
        let slabs = slab_count(args);
        if slabs == 0 {
            return Ok(0);
        }
        get_static!(d);
        let parts = match n.get_static() {
            Some(&n) => args.part_rows.min(n.max(1)),
            None => args.part_rows,
        };
        Ok((slabs * parts * d * dt_s.nbytes()).min(max_workspace_size))
    }

    fn launch<QA>(
        &self,
        args: &Self::Args,
        workspace: &mut [ByteOf<Self::Hardware>],
        queue_alloc: &QA,
    ) -> Result<(), LaunchError>
    where
        QA: QueueAlloc<Hardware = Self::Hardware>,
    {
        let Meta {
            dt_a,
            dt_w,
            dt_s,
            n,
            d,
        } = args.meta()?;
        let GradArgs {
            mode,
            dx_layout,
            dx_base,
            dscale_layout,
            dscale_base,
            dbias_layout,
            dbias_base,
            dy_layout,
            dy_base,
            x_layout,
            x_base,
            scale_layout,
            scale_base,
            mean_layout,
            mean_base,
            inv_std_layout,
            inv_std_base,
            part_rows,
        } = args;

        let &[dxns, dxds] = dx_layout.strides() else {
            unreachable!()
        };
        let &[dyns, dyds] = dy_layout.strides() else {
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
              n    d
            dxns dxds
            dyns dyds
             xns  xds
             sns  mns
        }

        let unit_a = dt_a.nbytes() as isize;
        let unit_w = dt_w.nbytes() as isize;
        if dxds != unit_a || xds != unit_a || dyds != unit_w {
            return Err(strides_not_support("rows must be contiguous").into());
        }
        for (layout, base) in [
            (scale_layout, *scale_base),
            (dscale_layout, dscale_base.cast_const()),
            (dbias_layout, dbias_base.cast_const()),
        ] {
            if !base.is_null() {
                let &[ds] = layout.strides() else {
                    unreachable!()
                };
                get_static!(ds);
                if ds != unit_w {
                    return Err(strides_not_support("parameters must be contiguous").into());
                }
            }
        }

        let parts = (*part_rows).min(n.max(1));
        let slabs = slab_count(args);
        let mut workspace = Workspace::new(queue_alloc, workspace, slabs * parts * d * dt_s.nbytes());

        macro_rules! calculate {
            ($w:ty, $a:ty, $x:ty) => {{
                let scheme = Scheme::<$x, $a, $w> {
                    n,
                    d,
                    parts,
                    dxns,
                    dyns,
                    xns,
                    mns,
                    sns,
                    dx: dx_base.cast::<$a>(),
                    dy: dy_base.cast::<$w>(),
                    x: x_base.cast::<$a>(),
                    scale: scale_base.cast::<$w>(),
                    mean: mean_base.cast::<$x>(),
                    inv_std: inv_std_base.cast::<$x>(),
                    dscale: dscale_base.cast::<$w>(),
                    dbias: dbias_base.cast::<$w>(),
                    part: workspace.as_mut_ptr().cast::<$x>(),
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

/// 参数梯度需要的部分和板数：缩放一块，平移再一块。
#[inline]
fn slab_count(args: &GradArgs<Cpu>) -> usize {
    (!args.scale_base.is_null()) as usize + (!args.dbias_base.is_null()) as usize
}

struct Scheme<X, Ta, Tw> {
    n: usize,
    d: usize,
    parts: usize,
    dxns: isize,
    dyns: isize,
    xns: isize,
    mns: isize,
    sns: isize,
    dx: *mut Ta,
    dy: *const Tw,
    x: *const Ta,
    scale: *const Tw,
    mean: *const X,
    inv_std: *const X,
    dscale: *mut Tw,
    dbias: *mut Tw,
    part: *mut X,
}

impl<X, Ta, Tw> Scheme<X, Ta, Tw>
where
    X: Real + AddAssign + Send + Sync,
    Ta: NumCast + ToPrimitive + Copy + Send + Sync,
    Tw: NumCast + ToPrimitive + Copy + Send + Sync,
{
    fn compute<M: Strategy<X>>(self) {
        let Self {
            n,
            d,
            parts,
            dxns,
            dyns,
            xns,
            mns,
            sns,
            ..
        } = self;
        let dx = self.dx as isize;
        let dy = self.dy as isize;
        let x = self.x as isize;
        let scale = self.scale as isize;
        let mean = self.mean as isize;
        let inv_std = self.inv_std as isize;
        let part = self.part as isize;
        let has_scale = !self.scale.is_null();
        let has_dbias = !self.dbias.is_null();

        let stats = |i: isize| RowStats {
            mean: if M::CENTERED {
                unsafe { ((mean + i * mns) as *const X).read() }
            } else {
                X::zero()
            },
            inv_std: unsafe { ((inv_std + i * sns) as *const X).read() },
        };

        // 输入梯度：每行两个标量和从保存的统计量重建，无需再归约原始输入
        (0..n as isize).into_par_iter().for_each(|i| {
            let dy_row = (dy + i * dyns) as *const Tw;
            let x_row = (x + i * xns) as *const Ta;
            let dx_row = (dx + i * dxns) as *mut Ta;
            let scale = scale as *const Tw;
            let st = stats(i);

            let weighted = |j: usize| {
                let mut g: X = get(dy_row, j);
                if has_scale {
                    g = g * get::<X, Tw>(scale, j);
                }
                g
            };
            let (s1, s2) = tree_sum2(0, d, &|j| {
                let g = weighted(j);
                (g, g * M::normalize(get(x_row, j), &st))
            });
            let sum1 = if M::CENTERED { s1 } else { X::zero() };

            let nd = X::from(d).unwrap();
            let k = st.inv_std / nd;
            for j in 0..d {
                let xhat = M::normalize(get(x_row, j), &st);
                put(dx_row, j, (nd * weighted(j) - sum1 - xhat * s2) * k);
            }
        });

        if !has_scale {
            return;
        }

        // 参数梯度第一阶段：每段独占一块板，段内按行累加
        let chunk = n.div_ceil(parts);
        (0..parts).into_par_iter().for_each(|s| {
            let ds_slab = (part + (s * d * size_of::<X>()) as isize) as *mut X;
            let db_slab = (part + ((parts + s) * d * size_of::<X>()) as isize) as *mut X;
            let r0 = s * chunk;
            let r1 = ((s + 1) * chunk).min(n);

            if r0 >= r1 {
                for j in 0..d {
                    unsafe { ds_slab.add(j).write(X::zero()) };
                    if has_dbias {
                        unsafe { db_slab.add(j).write(X::zero()) };
                    }
                }
                return;
            }

            for (idx, i) in (r0 as isize..r1 as isize).enumerate() {
                let dy_row = (dy + i * dyns) as *const Tw;
                let x_row = (x + i * xns) as *const Ta;
                let st = stats(i);
                for j in 0..d {
                    let g: X = get(dy_row, j);
                    let gs = g * M::normalize(get(x_row, j), &st);
                    if idx == 0 {
                        unsafe { ds_slab.add(j).write(gs) };
                        if has_dbias {
                            unsafe { db_slab.add(j).write(g) };
                        }
                    } else {
                        unsafe { *ds_slab.add(j) += gs };
                        if has_dbias {
                            unsafe { *db_slab.add(j) += g };
                        }
                    }
                }
            }
        });

        // 第二阶段：逐列对各段部分和做树形归约，结果恰好写一次
        let dscale = self.dscale as isize;
        let dbias = self.dbias as isize;
        (0..d).into_par_iter().for_each(|j| {
            let slab = part as *const X;
            let v = tree_sum(0, parts, &|s| unsafe { slab.add(s * d + j).read() });
            put(dscale as *mut Tw, j, v);
            if has_dbias {
                let v = tree_sum(0, parts, &|s| unsafe {
                    slab.add((parts + s) * d + j).read()
                });
                put(dbias as *mut Tw, j, v);
            }
        });
    }
}

/// 与行内矩归约同形状的标量和，保证结果与并行度无关。
fn tree_sum<X: Real + AddAssign>(offset: usize, len: usize, load: &impl Fn(usize) -> X) -> X {
    if len <= LEAF {
        let mut lanes = [X::zero(); 4];
        let mut i = 0;
        while i + 4 <= len {
            lanes[0] += load(offset + i);
            lanes[1] += load(offset + i + 1);
            lanes[2] += load(offset + i + 2);
            lanes[3] += load(offset + i + 3);
            i += 4;
        }
        for j in i..len {
            lanes[j % 4] += load(offset + j);
        }
        let [a, b, c, d] = lanes;
        (a + b) + (c + d)
    } else {
        let half = len / 2;
        tree_sum(offset, half, load) + tree_sum(offset + half, len - half, load)
    }
}

/// 同时归约两个标量和，单趟读取。
fn tree_sum2<X: Real + AddAssign>(
    offset: usize,
    len: usize,
    load: &impl Fn(usize) -> (X, X),
) -> (X, X) {
    if len <= LEAF {
        let mut lanes = [(X::zero(), X::zero()); 4];
        let mut push = |lane: usize, j: usize| {
            let (a, b) = load(offset + j);
            lanes[lane].0 += a;
            lanes[lane].1 += b;
        };
        let mut i = 0;
        while i + 4 <= len {
            push(0, i);
            push(1, i + 1);
            push(2, i + 2);
            push(3, i + 3);
            i += 4;
        }
        for j in i..len {
            push(j % 4, j);
        }
        let [a, b, c, d] = lanes;
        ((a.0 + b.0) + (c.0 + d.0), (a.1 + b.1) + (c.1 + d.1))
    } else {
        let half = len / 2;
        let lo = tree_sum2(offset, half, load);
        let hi = tree_sum2(offset + half, len - half, load);
        (lo.0 + hi.0, lo.1 + hi.1)
    }
}
