use super::MaybeDyn;
use digit_layout::DigitLayout;
use std::{
    alloc::{alloc, dealloc, Layout},
    ptr::{copy_nonoverlapping, NonNull},
    slice::from_raw_parts,
};

/// | field    | type          |
/// |:--------:|:-------------:|
/// | dt       | DigitLayout   |
/// | ndim     | usize         |
/// | shape    | [usize; ndim] |
/// | strides  | [isize; ndim] |
#[repr(transparent)]
pub struct TensorLayout(NonNull<usize>);

impl TensorLayout {
    pub fn new_dyn(
        dt: DigitLayout,
        shape: &[MaybeDyn<usize>],
        strides: &[MaybeDyn<isize>],
    ) -> Self {
        let shape: &[usize] = unsafe { std::mem::transmute(shape) };
        let strides: &[isize] = unsafe { std::mem::transmute(strides) };
        Self::new(dt, shape, strides)
    }

    pub fn new(dt: DigitLayout, shape: &[usize], strides: &[isize]) -> Self {
        assert_eq!(shape.len(), strides.len());

        unsafe {
            let ptr = alloc(Self::layout(shape.len()));

            let cursor: *mut DigitLayout = ptr.cast();
            cursor.write(dt);
            let cursor: *mut usize = cursor.add(1).cast();
            cursor.write(shape.len());
            let cursor = cursor.add(1);
            copy_nonoverlapping(shape.as_ptr(), cursor, shape.len());
            let cursor: *mut isize = cursor.add(shape.len()).cast();
            copy_nonoverlapping(strides.as_ptr(), cursor, strides.len());

            Self(NonNull::new_unchecked(ptr as _))
        }
    }

    pub fn new_contiguous(dt: DigitLayout, shape: &[usize]) -> Self {
        let mut strides = shape
            .iter()
            .rev()
            .scan(dt.nbytes() as isize, |mul, &d| {
                let stride = *mul;
                *mul *= d as isize;
                Some(stride)
            })
            .collect::<Vec<_>>();
        strides.reverse();
        Self::new(dt, shape, &strides)
    }

    #[inline]
    pub fn dt(&self) -> DigitLayout {
        let ptr = self.0.cast();
        unsafe { *ptr.as_ref() }
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        let ptr = self.0.as_ptr();
        unsafe { *ptr.add(1) }
    }

    #[inline]
    pub fn shape(&self) -> &[MaybeDyn<usize>] {
        let ptr = self.0.cast::<MaybeDyn<usize>>().as_ptr();
        let len = self.ndim();
        unsafe { from_raw_parts(ptr.add(2), len) }
    }

    #[inline]
    pub fn strides(&self) -> &[MaybeDyn<isize>] {
        let ptr = self.0.cast::<MaybeDyn<isize>>().as_ptr();
        let len = self.ndim();
        unsafe { from_raw_parts(ptr.add(2 + len), len) }
    }

    #[inline(always)]
    fn layout(ndim: usize) -> Layout {
        Layout::array::<usize>(2 + ndim * 2).unwrap()
    }
}

impl Clone for TensorLayout {
    #[inline]
    fn clone(&self) -> Self {
        let layout = Self::layout(self.ndim());
        let src = self.0.cast::<u8>().as_ptr();
        unsafe {
            let dst = alloc(layout);
            copy_nonoverlapping(src, dst, layout.size());
            Self(NonNull::new_unchecked(dst as _))
        }
    }
}

impl Drop for TensorLayout {
    #[inline]
    fn drop(&mut self) {
        let ptr = self.0.cast().as_ptr();
        let layout = Self::layout(self.ndim());
        unsafe { dealloc(ptr, layout) }
    }
}

#[cfg(test)]
mod test {
    use super::TensorLayout;
    use crate::MaybeDyn;
    use digit_layout::types as ty;

    #[test]
    fn test_header_round_trip() {
        let layout = TensorLayout::new(ty::F64, &[3, 5], &[40, 8]);
        assert_eq!(layout.dt(), ty::F64);
        assert_eq!(layout.ndim(), 2);
        assert_eq!(layout.shape(), &[MaybeDyn(3), MaybeDyn(5)]);
        assert_eq!(layout.strides(), &[MaybeDyn(40), MaybeDyn(8)]);

        let clone = layout.clone();
        assert_eq!(clone.dt(), ty::F64);
        assert_eq!(clone.shape(), layout.shape());
        assert_eq!(clone.strides(), layout.strides());
    }

    #[test]
    fn test_contiguous_strides_in_bytes() {
        let layout = TensorLayout::new_contiguous(ty::F16, &[2, 4, 8]);
        assert_eq!(layout.ndim(), 3);
        assert_eq!(layout.shape(), &[MaybeDyn(2), MaybeDyn(4), MaybeDyn(8)]);
        assert_eq!(layout.strides(), &[MaybeDyn(64), MaybeDyn(16), MaybeDyn(2)]);
    }
}
