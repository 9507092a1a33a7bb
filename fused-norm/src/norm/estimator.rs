//! 流式矩估计：Welford 单趟更新 + Chan 并行合并。
//!
//! 归约形状固定：行先切成叶块，叶块内 4 路独立累加，再按二叉树成对合并，
//! 因此结果与并行度无关，且舍入误差不随行宽线性增长。

use num_traits::real::Real;
use std::ops::AddAssign;

/// 叶块长度。
pub(super) const LEAF: usize = 256;

/// 每行归一化所需的统计量。
#[derive(Clone, Copy, Debug)]
pub(super) struct RowStats<X> {
    pub mean: X,
    pub inv_std: X,
}

/// 可结合、可交换的流式矩累加器。
pub(super) trait Accumulator<X>: Copy {
    fn zero() -> Self;
    fn push(&mut self, x: X);
    fn merge(self, other: Self) -> Self;
    /// 整行集齐后给出（均值，二阶矩）。
    fn finish(self) -> (X, X);
}

/// Welford 流式均值/方差。`m2` 是未归一化的平方偏差和。
#[derive(Clone, Copy)]
pub(super) struct Welford<X> {
    mean: X,
    m2: X,
    count: usize,
}

impl<X: Real + AddAssign> Accumulator<X> for Welford<X> {
    #[inline]
    fn zero() -> Self {
        Self {
            mean: X::zero(),
            m2: X::zero(),
            count: 0,
        }
    }

    #[inline]
    fn push(&mut self, x: X) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / X::from(self.count).unwrap();
        self.m2 += delta * (x - self.mean);
    }

    /// Chan 并行更新公式。
    fn merge(self, other: Self) -> Self {
        let count = self.count + other.count;
        if count == 0 {
            return Self::zero();
        }
        let n = X::from(count).unwrap();
        let wa = X::from(self.count).unwrap() / n;
        let wb = X::from(other.count).unwrap() / n;
        let delta = other.mean - self.mean;
        Self {
            mean: self.mean * wa + other.mean * wb,
            m2: self.m2 + other.m2 + delta * delta * wa * wb * n,
            count,
        }
    }

    #[inline]
    fn finish(self) -> (X, X) {
        if self.count == 0 {
            return (X::zero(), X::zero());
        }
        (self.mean, self.m2 / X::from(self.count).unwrap())
    }
}

/// RMS 模式不跟踪均值，只累加平方和，合并即相加。
#[derive(Clone, Copy)]
pub(super) struct SumSquares<X> {
    sum: X,
    count: usize,
}

impl<X: Real + AddAssign> Accumulator<X> for SumSquares<X> {
    #[inline]
    fn zero() -> Self {
        Self {
            sum: X::zero(),
            count: 0,
        }
    }

    #[inline]
    fn push(&mut self, x: X) {
        self.count += 1;
        self.sum += x * x;
    }

    #[inline]
    fn merge(self, other: Self) -> Self {
        Self {
            sum: self.sum + other.sum,
            count: self.count + other.count,
        }
    }

    #[inline]
    fn finish(self) -> (X, X) {
        if self.count == 0 {
            return (X::zero(), X::zero());
        }
        (X::zero(), self.sum / X::from(self.count).unwrap())
    }
}

/// 归一化模式策略。
///
/// 两个零大小类型共享同一接口，模式差异全部收敛到这里，
/// 核心例程不再携带运行时模式分支。
pub(super) trait Strategy<X: Real + AddAssign + Send>: Copy + Send + Sync + 'static {
    type Acc: Accumulator<X> + Send;

    /// 是否中心化，也决定是否产出/消费按行均值与 `sum_loss1` 项。
    const CENTERED: bool;

    fn stats(acc: Self::Acc, epsilon: X) -> RowStats<X> {
        let (mean, ms) = acc.finish();
        RowStats {
            mean,
            inv_std: (ms + epsilon).sqrt().recip(),
        }
    }

    fn normalize(x: X, stats: &RowStats<X>) -> X;
}

/// 完整 layer norm：中心化二阶矩。
#[derive(Clone, Copy)]
pub(super) struct Layer;

/// 仅 RMS：原始二阶矩。
#[derive(Clone, Copy)]
pub(super) struct Rms;

impl<X: Real + AddAssign + Send> Strategy<X> for Layer {
    type Acc = Welford<X>;
    const CENTERED: bool = true;

    #[inline]
    fn normalize(x: X, stats: &RowStats<X>) -> X {
        (x - stats.mean) * stats.inv_std
    }
}

impl<X: Real + AddAssign + Send> Strategy<X> for Rms {
    type Acc = SumSquares<X>;
    const CENTERED: bool = false;

    #[inline]
    fn normalize(x: X, stats: &RowStats<X>) -> X {
        x * stats.inv_std
    }
}

/// 对 `[offset, offset + len)` 的行片段做固定形状归约。
pub(super) fn reduce_row<X, A>(offset: usize, len: usize, load: &impl Fn(usize) -> X) -> A
where
    X: Real + AddAssign,
    A: Accumulator<X>,
{
    if len <= LEAF {
        let mut lanes = [A::zero(); 4];
        let mut i = 0;
        while i + 4 <= len {
            lanes[0].push(load(offset + i));
            lanes[1].push(load(offset + i + 1));
            lanes[2].push(load(offset + i + 2));
            lanes[3].push(load(offset + i + 3));
            i += 4;
        }
        for j in i..len {
            lanes[j % 4].push(load(offset + j));
        }
        let [a, b, c, d] = lanes;
        a.merge(b).merge(c.merge(d))
    } else {
        let half = len / 2;
        let lo: A = reduce_row(offset, half, load);
        let hi: A = reduce_row(offset + half, len - half, load);
        lo.merge(hi)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn welford_of(data: &[f64]) -> Welford<f64> {
        let mut acc = Welford::zero();
        for &x in data {
            acc.push(x);
        }
        acc
    }

    #[test]
    fn test_welford_matches_two_pass() {
        let data: Vec<f64> = (0..1000).map(|i| ((i * 37 % 101) as f64).sin() * 3.).collect();
        let (mean, var) = welford_of(&data).finish();

        let m = data.iter().sum::<f64>() / data.len() as f64;
        let v = data.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / data.len() as f64;

        assert!((mean - m).abs() < 1e-12);
        assert!((var - v).abs() < 1e-12);
    }

    #[test]
    fn test_chan_merge_equals_whole_fold() {
        let data: Vec<f64> = (0..777).map(|i| ((i * 13 % 71) as f64).cos() * 5. - 1.).collect();
        let (mean, var) = welford_of(&data).finish();

        for split in [1, 2, 100, 333, 776] {
            let (a, b) = data.split_at(split);
            let (m, v) = welford_of(a).merge(welford_of(b)).finish();
            assert!((m - mean).abs() < 1e-12, "split {split}");
            assert!((v - var).abs() < 1e-12, "split {split}");
        }
    }

    #[test]
    fn test_empty_merge_resets_to_zero() {
        let merged = Welford::<f64>::zero().merge(Welford::zero());
        let (mean, var) = merged.finish();
        assert_eq!(mean, 0.);
        assert_eq!(var, 0.);
    }

    #[test]
    fn test_tree_reduction_equals_sequential() {
        let data: Vec<f64> = (0..2000).map(|i| ((i * 7 % 313) as f64).sqrt() - 8.).collect();
        let tree: Welford<f64> = reduce_row(0, data.len(), &|j| data[j]);
        let (mt, vt) = tree.finish();
        let (ms, vs) = welford_of(&data).finish();
        assert!((mt - ms).abs() < 1e-12);
        assert!((vt - vs).abs() < 1e-12);

        let tree: SumSquares<f64> = reduce_row(0, data.len(), &|j| data[j]);
        let (_, rms) = tree.finish();
        let naive = data.iter().map(|x| x * x).sum::<f64>() / data.len() as f64;
        assert!((rms - naive).abs() < 1e-12);
    }

    #[test]
    fn test_rms_stats_carry_no_mean() {
        let data = [1.0f64, 2., 3., 4.];
        let acc: SumSquares<f64> = reduce_row(0, 4, &|j| data[j]);
        let stats = <Rms as Strategy<f64>>::stats(acc, 1e-5);
        assert_eq!(stats.mean, 0.);
        assert!((stats.inv_std - (7.5f64 + 1e-5).sqrt().recip()).abs() < 1e-12);
    }
}
