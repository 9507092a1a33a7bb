//! 融合归一化算子：对二维张量的最后一维做 layer norm / RMS norm，
//! 前向与反向共用一条代码路径，模式差异由 [estimator] 中的类型化策略承担。
//!
//! 前向每行产出归一化输出与保存的统计量（均值与方差倒数平方根）；
//! 反向从保存的统计量重建两个按行标量和，给出输入梯度，
//! 并用两阶段归约（分段部分和 + 最终归约）给出缩放/平移参数的梯度。

#[cfg(any(use_cpu, test))]
pub mod common_cpu;

mod args;
mod estimator;

pub use args::{Args, GradArgs, NormMode};

crate::op_trait!(Norm, Args);
crate::op_trait!(NormBackward, GradArgs);
