//! The pull contract shared by every producer the bridge can drive.

use std::convert::Infallible;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};

use crate::streaming::BoxError;
use crate::sync::Step;

/// A lazily advanced producer.
///
/// `next` is called once per unit of demand and must not run ahead of it.
/// `cancel` tells the producer its consumer stopped early so it can release
/// whatever it holds.
pub trait Source: Send + 'static {
    type Item: Send + 'static;

    /// Advance by exactly one step.
    fn next(&mut self) -> BoxFuture<'_, Result<Step<Self::Item>, BoxError>>;

    /// Early termination signal.
    fn cancel(&mut self) {}
}

/// Type-erased byte source carried by streaming replies.
pub type BoxSource = Box<dyn Source<Item = Bytes>>;

impl<S: Source + ?Sized> Source for Box<S> {
    type Item = S::Item;

    fn next(&mut self) -> BoxFuture<'_, Result<Step<Self::Item>, BoxError>> {
        (**self).next()
    }

    fn cancel(&mut self) {
        (**self).cancel()
    }
}

/// Combinators for [`Source`].
pub trait SourceExt: Source + Sized {
    /// Transform every produced value.
    fn map<U, F>(self, f: F) -> Map<Self, F>
    where
        U: Send + 'static,
        F: FnMut(Self::Item) -> U + Send + 'static,
    {
        Map { source: self, f }
    }

    /// Erase into the byte source a streaming reply carries.
    fn into_chunks(self) -> BoxSource
    where
        Self::Item: Into<Bytes>,
    {
        Box::new(self.map(|item| -> Bytes { item.into() }))
    }
}

impl<S: Source> SourceExt for S {}

/// Source returned by [`SourceExt::map`].
pub struct Map<S, F> {
    source: S,
    f: F,
}

impl<S, F, U> Source for Map<S, F>
where
    S: Source,
    U: Send + 'static,
    F: FnMut(S::Item) -> U + Send + 'static,
{
    type Item = U;

    fn next(&mut self) -> BoxFuture<'_, Result<Step<U>, BoxError>> {
        Box::pin(async move {
            let step = self.source.next().await?;
            Ok(Step {
                value: step.value.map(&mut self.f),
                done: step.done,
            })
        })
    }

    fn cancel(&mut self) {
        self.source.cancel();
    }
}

/// A raw lazy sequence: any fallible stream driven one item per demand.
///
/// The stream is dropped on cancellation, releasing what it owns.
pub struct Sequence<T, E = Infallible> {
    stream: Option<BoxStream<'static, Result<T, E>>>,
}

impl<T, E> Sequence<T, E>
where
    T: Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
    {
        Self {
            stream: Some(stream.boxed()),
        }
    }

    /// Whether the underlying stream has been released.
    pub fn is_released(&self) -> bool {
        self.stream.is_none()
    }
}

impl<T: Send + 'static> Sequence<T, Infallible> {
    /// Wrap an infallible stream.
    pub fn infallible<S>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self::new(stream.map(Ok))
    }

    /// Wrap an iterator.
    pub fn iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::infallible(stream::iter(iter))
    }
}

impl<T, E> Source for Sequence<T, E>
where
    T: Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    type Item = T;

    fn next(&mut self) -> BoxFuture<'_, Result<Step<T>, BoxError>> {
        Box::pin(async move {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(Step::done());
            };
            let item = stream.next().await;
            match item {
                Some(Ok(value)) => Ok(Step::next(value)),
                Some(Err(err)) => Err(err.into()),
                None => {
                    self.stream = None;
                    Ok(Step::done())
                }
            }
        })
    }

    fn cancel(&mut self) {
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_steps_then_done() {
        let mut source = Sequence::iter(vec![1, 2]);
        assert_eq!(source.next().await.unwrap(), Step::next(1));
        assert_eq!(source.next().await.unwrap(), Step::next(2));
        assert_eq!(source.next().await.unwrap(), Step::done());
        assert!(source.is_released());
    }

    #[tokio::test]
    async fn test_sequence_propagates_errors() {
        let items: Vec<Result<u8, std::io::Error>> = vec![Ok(1), Err(std::io::Error::other("disk"))];
        let mut source = Sequence::new(stream::iter(items));

        assert_eq!(source.next().await.unwrap(), Step::next(1));
        let err = source.next().await.unwrap_err();
        assert_eq!(err.to_string(), "disk");
    }

    #[tokio::test]
    async fn test_cancel_releases_stream() {
        let mut source = Sequence::infallible(stream::repeat(0u8));
        assert_eq!(source.next().await.unwrap(), Step::next(0));
        source.cancel();
        assert!(source.is_released());
        assert_eq!(source.next().await.unwrap(), Step::done());
    }

    #[tokio::test]
    async fn test_map_and_into_chunks() {
        let mut chunks = Sequence::iter(vec![1, 2]).map(|n| format!("n={n}\n")).into_chunks();
        let step = chunks.next().await.unwrap();
        assert_eq!(step.value, Some(Bytes::from("n=1\n")));
        assert!(!step.done);
    }
}
