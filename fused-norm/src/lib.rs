mod common;
mod handle;

pub mod norm;

pub use common::*;

#[cfg(any(use_cpu, test))]
pub use handle::common_cpu;

/// 算力硬件抽象。
///
/// 约定硬件如何存储和运行。
/// 这个特质应该由管理硬件的基本单元的映射类型实现，通常是**硬件上下文**。
pub trait Hardware {
    /// 硬件的存储单元类型。
    type Byte;
    /// 硬件的任务队列类型。
    type Queue<'ctx>;
}

pub trait TopoNode<H> {
    fn processor(&self) -> &H;
    fn rank(&self) -> usize;
    fn group_size(&self) -> usize;
}

impl<H: Hardware> TopoNode<H> for H {
    #[inline]
    fn processor(&self) -> &H {
        self
    }
    #[inline]
    fn rank(&self) -> usize {
        0
    }
    #[inline]
    fn group_size(&self) -> usize {
        1
    }
}

pub type ByteOf<H> = <H as Hardware>::Byte;
pub type QueueOf<'ctx, H> = <H as Hardware>::Queue<'ctx>;
pub type ArgsOf<O> = <O as Operator>::Args;
pub(crate) type MutPtr<H> = *mut <H as Hardware>::Byte;
pub(crate) type ConstPtr<H> = *const <H as Hardware>::Byte;

pub trait Alloc<M> {
    fn alloc(&self, size: usize) -> M;
    fn free(&self, mem: M);
}

/// 绑定到队列的分配器。
pub trait QueueAlloc: Alloc<Self::DevMem> {
    /// 队列分配器对应的硬件。
    type Hardware: Hardware;
    /// 分配器分配和回收的对象，表示对某块存储区域的所有权。
    type DevMem: std::ops::DerefMut<Target = [ByteOf<Self::Hardware>]>;
    /// 分配器对应的队列。
    fn queue(&self) -> &QueueOf<Self::Hardware>;
}

/// 算子。
pub trait Operator {
    /// 执行算子的硬件。
    type Hardware: Hardware;
    /// 算子对应的拓扑节点。
    type TopoNode: TopoNode<Self::Hardware>;
    /// 算子的参数类型。
    type Args;

    /// 在指定拓扑节点上创建算子实例。
    fn new(node: &Self::TopoNode) -> Self;

    /// 规划执行方案。
    ///
    /// 通过向算子实例提供尽可能详细的参数来尽量确定算子执行方案。
    /// 参数中标量值、张量形状和张量步长允许动态（[dyn_]），基址允许空指针，以便复用算子实例。
    ///
    /// 另外，需要传入一个最大工作空间容量。工作空间是与硬件存储单元相同类型的存储区域，
    /// 供算子执行过程中使用。返回值是不大于最大工作空间容量的工作空间需求。
    /// 如果算子还需要更多空间，可能产生运行时分配。
    fn scheme(
        &mut self,
        args: &Self::Args,
        max_workspace_size: usize,
    ) -> Result<usize, SchemeError>;

    /// 发射算子到任务队列。
    ///
    /// 如果算子实际需要的工作空间大于通过参数提供的工作空间，将通过流分配器分配和释放工作空间。
    fn launch<QA>(
        &self,
        args: &Self::Args,
        workspace: &mut [ByteOf<Self::Hardware>],
        queue_alloc: &QA,
    ) -> Result<(), LaunchError>
    where
        QA: QueueAlloc<Hardware = Self::Hardware>;
}

macro_rules! op_trait {
    ($name:ident, $args:ident $($body:item)*) => {
        pub trait $name<H: $crate::Hardware>:
            $crate::Operator<
            Hardware = H,
            TopoNode = H,
            Args = $args<H>,
        >{$($body)*}
    };
}

pub(crate) use op_trait;
