use std::sync::OnceLock;
use crate::utilities::enums::Kernel;

static BEST_BATCH  : OnceLock<Kernel> = OnceLock::new();

#[inline(always)]
pub fn detect_best_batch_kernel() -> Kernel {
    *BEST_BATCH.get_or_init(|| {
        if rayon::current_num_threads() <= 1 {
            Kernel::Scalar
        } else {
            Kernel::ScalarBatch
        }
    })
}

/// Resolves `Auto` to a concrete kernel; concrete choices pass through.
#[inline]
pub fn resolve_kernel(kernel: Kernel) -> Kernel {
    match kernel {
        Kernel::Auto => detect_best_batch_kernel(),
        other => other,
    }
}

/// Splits `items` into `parts` contiguous sublists whose lengths differ by at most one.
///
/// The remainder goes to the leading sublists. When there are fewer items than parts the
/// number of sublists shrinks to the item count, so no sublist is ever empty (unless
/// `items` itself is empty, in which case the result is empty).
pub fn split_list<T: Clone>(items: &[T], parts: usize) -> Vec<Vec<T>> {
    if items.is_empty() || parts == 0 {
        return Vec::new();
    }
    let n = parts.min(items.len());
    let k = items.len() / parts;
    let m = items.len() % parts;
    (0..n)
        .map(|i| {
            let lo = i * k + i.min(m);
            let hi = (i + 1) * k + (i + 1).min(m);
            items[lo..hi].to_vec()
        })
        .collect()
}
