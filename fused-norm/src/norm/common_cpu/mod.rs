mod backward;
mod forward;

pub use backward::Backward;
pub use forward::Forward;

use num_traits::{NumCast, ToPrimitive};

#[inline]
fn get<X: NumCast, T: ToPrimitive + Copy>(ptr: *const T, j: usize) -> X {
    X::from(unsafe { ptr.add(j).read() }).unwrap()
}

#[inline]
fn put<X: ToPrimitive, T: NumCast>(ptr: *mut T, j: usize, v: X) {
    unsafe { ptr.add(j).write(T::from(v).unwrap()) }
}
