/*!
# Разбиение входа на чанки

Детерминированное разбиение последовательности длины `L` на `min(T, L)`
непрерывных чанков. Остаток `L % T` распределяется по первым чанкам, так что
размеры чанков отличаются не более чем на единицу, а последний чанк никогда
не оказывается непропорционально большим.

```text
L = 7, T = 3  →  [0..3) [3..5) [5..7)
L = 2, T = 5  →  [0..1) [1..2)
```
*/

use std::ops::Range;

use crate::error::ParallelError;

/// Границы чанков для `len` элементов и `threads` потоков
pub fn split(threads: usize, len: usize) -> Result<Vec<Range<usize>>, ParallelError> {
    if threads == 0 {
        return Err(ParallelError::InvalidThreadCount(threads));
    }

    let chunks = threads.min(len);
    if chunks == 0 {
        return Ok(Vec::new());
    }

    let base = len / chunks;
    let remainder = len % chunks;

    let mut ranges = Vec::with_capacity(chunks);
    let mut start = 0;
    for i in 0..chunks {
        let size = if i < remainder { base + 1 } else { base };
        ranges.push(start..start + size);
        start += size;
    }

    debug_assert_eq!(start, len);
    Ok(ranges)
}

/// Разбиение среза на представления без копирования
pub fn split_slice<T>(threads: usize, values: &[T]) -> Result<Vec<&[T]>, ParallelError> {
    Ok(split(threads, values.len())?
        .into_iter()
        .map(|range| &values[range])
        .collect())
}
