use crate::{Alloc, Blob, Hardware, QueueAlloc, QueueOf};

#[derive(Clone, Copy, Debug)]
pub struct Cpu;

#[derive(Clone, Copy, Debug)]
pub struct ThisThread;

impl Hardware for Cpu {
    type Byte = u8;
    type Queue<'ctx> = ThisThread;
}

impl Alloc<Blob> for ThisThread {
    #[inline]
    fn alloc(&self, size: usize) -> Blob {
        Blob::new(size)
    }
    #[inline]
    fn free(&self, _mem: Blob) {}
}

impl QueueAlloc for ThisThread {
    type Hardware = Cpu;
    type DevMem = Blob;
    #[inline]
    fn queue(&self) -> &QueueOf<Self::Hardware> {
        self
    }
}
