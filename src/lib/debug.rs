//! Bounded stack walk used by the panic path (§4.K: up to 8 frames).

const MAX_FRAMES: usize = 8;

/// Walk saved frame pointers starting at `ebp`, invoking `f(depth, return_addr)`
/// for each frame found. Stops at `MAX_FRAMES` or as soon as the chain looks
/// implausible (null, misaligned, or non-increasing) -- a corrupted stack
/// must bound this walk, not turn it into a second fault.
pub fn walk_stack(mut ebp: usize, mut f: impl FnMut(usize, usize)) {
    for depth in 0..MAX_FRAMES {
        if ebp == 0 || ebp % 4 != 0 {
            break;
        }
        // SAFETY: alignment and non-null are checked above; a bad chain is
        // bounded by MAX_FRAMES and by the non-increasing check below.
        let (saved_ebp, return_addr) = unsafe {
            let frame = ebp as *const usize;
            (core::ptr::read_volatile(frame), core::ptr::read_volatile(frame.add(1)))
        };
        if return_addr == 0 {
            break;
        }
        f(depth, return_addr);
        if saved_ebp <= ebp {
            break;
        }
        ebp = saved_ebp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_on_null_base_pointer() {
        let mut calls = 0;
        walk_stack(0, |_, _| calls += 1);
        assert_eq!(calls, 0);
    }

    #[test]
    fn walks_a_synthetic_frame_chain() {
        // frame[0] = saved_ebp (0, terminate), frame[1] = return address
        let frames: [usize; 2] = [0, 0x1234];
        let ebp = frames.as_ptr() as usize;
        let mut seen = alloc::vec::Vec::new();
        walk_stack(ebp, |depth, addr| seen.push((depth, addr)));
        assert_eq!(seen, alloc::vec![(0, 0x1234)]);
    }
}
