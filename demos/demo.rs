//! Walks through the three classic scenarios: a simple allocation, freeing
//! every other block and asking for a bigger one, and zero-allocate / resize.

use firstfit::MemAlloc;

fn simple_allocation(allocator: &mut MemAlloc) {
    println!("--- Simple allocation ---");

    let ints = allocator.allocate(10 * size_of::<i32>());
    if !ints.is_null() {
        println!("Allocated 10 integers at {ints:?}");
        unsafe { allocator.free(ints) };
        println!("Freed 10 integers");
    }

    println!();
}

fn fragmentation_and_coalescing(allocator: &mut MemAlloc) {
    println!("--- Fragmentation & coalescing ---");

    println!("Allocating 10 blocks of 100 bytes each");
    let blocks: Vec<_> = (0..10).map(|_| allocator.allocate(100)).collect();

    println!("Freeing every other block");
    for block in blocks.iter().step_by(2) {
        unsafe { allocator.free(*block) };
    }

    println!("Allocating 300 bytes");
    let large = allocator.allocate(300);
    if large.is_null() {
        eprintln!("FAILURE: could not allocate 300 bytes");
    } else {
        println!("SUCCESS: allocated 300 bytes at {large:?}");
        unsafe { allocator.free(large) };
    }

    for block in blocks.iter().skip(1).step_by(2) {
        unsafe { allocator.free(*block) };
    }

    println!("{:?}", allocator.stats());
    println!();
}

fn zero_allocate_and_resize(allocator: &mut MemAlloc) {
    println!("--- zero_allocate & resize ---");

    let zeroed = allocator.zero_allocate(5, size_of::<i32>()).cast::<i32>();
    if !zeroed.is_null() {
        let values = unsafe { std::slice::from_raw_parts(zeroed, 5) };
        if values.iter().all(|value| *value == 0) {
            println!("SUCCESS: zero_allocate returned zeroed memory");
        } else {
            eprintln!("FAILURE: zero_allocate returned {values:?}");
        }
        unsafe { allocator.free(zeroed.cast()) };
    }

    let old = allocator.allocate(5 * size_of::<i32>()).cast::<i32>();
    if old.is_null() {
        eprintln!("FAILURE: could not allocate 5 integers");
        return;
    }

    unsafe {
        for i in 0..5 {
            old.add(i).write(i as i32 + 1);
        }
        println!("Original: {:?}", std::slice::from_raw_parts(old, 5));

        let new = allocator.resize(old.cast(), 10 * size_of::<i32>()).cast::<i32>();
        if new.is_null() {
            eprintln!("FAILURE: resize failed");
            allocator.free(old.cast());
        } else {
            println!("Resized, first 5: {:?}", std::slice::from_raw_parts(new, 5));
            allocator.free(new.cast());
        }
    }

    println!();
}

fn main() {
    let mut allocator = MemAlloc::new();

    simple_allocation(&mut allocator);
    fragmentation_and_coalescing(&mut allocator);
    zero_allocate_and_resize(&mut allocator);
}
