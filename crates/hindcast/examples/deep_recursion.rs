//! Debug target that recurses into itself a thousand times, then faults.
//!
//! With `--max-recursion 10` the recorded trace collapses the elided run
//! into a single `... recursion of N frames ...` marker followed by the
//! faulting frame.
//!
//! ```text
//! hindcast --stdout launch --max-recursion 10 deep_recursion.exe
//! ```

use std::hint::black_box;

#[inline(never)]
fn plunge(depth: u32) -> u32
{
    if depth == 0 {
        // Fault at the bottom of the well.
        let pointer: *mut u32 = black_box(core::ptr::null_mut());
        unsafe {
            pointer.write(0xDEAD);
        }
        return 0;
    }

    // The +1 keeps this from becoming a tail call the optimizer flattens.
    black_box(plunge(depth - 1)) + 1
}

fn main()
{
    println!("descending in process {}", std::process::id());
    let result = plunge(black_box(1000));
    println!("unreachable: {result}");
}
