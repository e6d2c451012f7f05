#![allow(non_snake_case)]

//! Request handler traits and implementations for type-safe HTTP processing.
//!
//! Handlers are asynchronous functions that take extractor arguments and return
//! any [`Responder`]. The [`Handler`] trait is implemented for plain
//! `async fn(Request)` handlers as well as for functions whose arguments
//! implement [`FromRequest`](crate::extractors::FromRequest), so the chat
//! endpoint can be written as `async fn(Json<ChatRequest>) -> impl Responder`
//! without manual body plumbing. [`BoxHandler`] erases the concrete type for
//! storage in the route table.

use std::{future::Future, pin::Pin, sync::Arc};

use futures_util::future::BoxFuture;

use crate::{
    extractors::FromRequest,
    responder::Responder,
    types::{Request, Response},
};

/// Trait for asynchronous HTTP request handlers.
pub trait Handler<T>: Send + Sync + 'static {
    /// Future type returned by the handler.
    type Future: Future<Output = Response> + Send + 'static;

    /// Calls the handler with the given request.
    fn call(self, req: Request) -> Self::Future;
}

/// Type-erased handler wrapper for dynamic storage and composition.
#[derive(Clone)]
pub struct BoxHandler {
    inner: Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>,
}

impl BoxHandler {
    /// Creates a new boxed handler from any handler implementation.
    pub(crate) fn new<H, T>(h: H) -> Self
    where
        H: Handler<T> + Clone,
    {
        let inner = Arc::new(move |req: Request| {
            let handler = h.clone();
            Box::pin(async move { handler.call(req).await }) as BoxFuture<'_, Response>
        });

        Self { inner }
    }

    /// Calls the boxed handler with the provided request.
    pub(crate) fn call(&self, req: Request) -> BoxFuture<'_, Response> {
        (self.inner)(req)
    }
}

// Zero-argument handlers: `async fn handler() -> impl Responder`
impl<F, Fut, R> Handler<()> for F
where
    F: FnOnce() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Responder,
{
    type Future = Pin<Box<dyn Future<Output = Response> + Send>>;

    fn call(self, _req: Request) -> Self::Future {
        Box::pin(async move { (self)().await.into_response() })
    }
}

// Whole-request handlers: `async fn handler(req: Request) -> impl Responder`
impl<F, Fut, R> Handler<(Request,)> for F
where
    F: FnOnce(Request) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Responder,
{
    type Future = Pin<Box<dyn Future<Output = Response> + Send>>;

    fn call(self, req: Request) -> Self::Future {
        Box::pin(async move { (self)(req).await.into_response() })
    }
}

// Abstraction over extraction that avoids HRTB bounds in impls.
trait Extract: Sized + Send {
    type Error: Responder;

    fn extract<'a>(
        req: &'a mut Request,
    ) -> Pin<Box<dyn Future<Output = core::result::Result<Self, Self::Error>> + Send + 'a>>;
}

impl<T, E> Extract for T
where
    T: Send,
    E: Responder,
    for<'a> T: FromRequest<'a, Error = E>,
{
    type Error = E;

    fn extract<'a>(
        req: &'a mut Request,
    ) -> Pin<Box<dyn Future<Output = core::result::Result<Self, Self::Error>> + Send + 'a>> {
        Box::pin(<T as FromRequest<'a>>::from_request(req))
    }
}

macro_rules! impl_handler {
    ($($T:ident),+ $(,)?) => {
        impl<Func, Fut, R, $($T,)*> Handler<($($T,)*)> for Func
        where
            Func: FnOnce($($T),*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: Responder,
            $( $T: Extract + Send, )*
        {
            type Future = Pin<Box<dyn Future<Output = Response> + Send>>;

            fn call(self, mut req: Request) -> Self::Future {
                Box::pin(async move {
                    $(
                        let $T = match <$T as Extract>::extract(&mut req).await {
                            Ok(value) => value,
                            Err(err) => {
                                return err.into_response();
                            }
                        };
                    )*
                    (self)($($T),*).await.into_response()
                })
            }
        }
    };
}

impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
