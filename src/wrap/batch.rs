//! Chunked processing of large inputs.

use super::{AsyncOperation, Metadata, Named, Operation};

/// Chunk size used when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Wrapper produced by [`super::OperationExt::batched`].
///
/// Splits a `Vec` argument into consecutive chunks and calls the inner
/// operation once per chunk, in order. The first failing chunk aborts
/// the run with its error.
#[derive(Clone)]
pub struct Batched<O> {
    inner: O,
    batch_size: usize,
}

impl<O> Batched<O> {
    /// A `batch_size` of zero is treated as one.
    pub fn new(inner: O, batch_size: usize) -> Self {
        Self {
            inner,
            batch_size: batch_size.max(1),
        }
    }

    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl<O: Named> Named for Batched<O> {
    fn metadata(&self) -> &Metadata {
        self.inner.metadata()
    }
}

impl<O: Named> Batched<O> {
    fn chunks<T>(&self, items: Vec<T>) -> Vec<Vec<T>> {
        let mut iter = items.into_iter();
        let mut chunks = Vec::new();
        loop {
            let chunk: Vec<T> = iter.by_ref().take(self.batch_size).collect();
            if chunk.is_empty() {
                break;
            }
            chunks.push(chunk);
        }
        tracing::debug!(
            operation = %self.name(),
            batches = chunks.len(),
            batch_size = self.batch_size,
            "Processing in batches"
        );
        chunks
    }
}

impl<O, T> Operation<Vec<T>> for Batched<O>
where
    O: Operation<Vec<T>>,
{
    type Output = Vec<O::Output>;
    type Error = O::Error;

    fn call(&self, items: Vec<T>) -> Result<Self::Output, Self::Error> {
        self.chunks(items)
            .into_iter()
            .map(|chunk| self.inner.call(chunk))
            .collect()
    }
}

impl<O, T> AsyncOperation<Vec<T>> for Batched<O>
where
    O: AsyncOperation<Vec<T>>,
{
    type Output = Vec<O::Output>;
    type Error = O::Error;

    async fn call_async(&self, items: Vec<T>) -> Result<Self::Output, Self::Error> {
        let chunks = self.chunks(items);
        let mut outputs = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            outputs.push(self.inner.call_async(chunk).await?);
        }
        Ok(outputs)
    }
}
