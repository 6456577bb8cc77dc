//! Thin unary / server-streaming caller over a tonic channel.

use serde::Serialize;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::{Request, Response, Status, Streaming};

use crate::error::TransportResult;
use crate::signing::RequestSigner;

#[derive(Debug, Clone)]
pub(crate) struct RpcClient {
    inner: Grpc<Channel>,
    signer: Option<RequestSigner>,
}

impl RpcClient {
    pub(crate) fn new(channel: Channel, signer: Option<RequestSigner>) -> Self {
        Self {
            inner: Grpc::new(channel),
            signer,
        }
    }

    /// Wrap `message`, attaching signature metadata over the body.
    pub(crate) fn signed<R: Serialize>(&self, method: &str, message: R) -> TransportResult<Request<R>> {
        let mut request = Request::new(message);
        if let Some(signer) = &self.signer {
            let signed = signer.sign(method, Some(request.get_ref()))?;
            signed.apply(request.metadata_mut())?;
        }
        Ok(request)
    }

    /// Wrap `message` for a server stream; the signature covers no body.
    pub(crate) fn signed_stream<R>(&self, method: &str, message: R) -> TransportResult<Request<R>> {
        let mut request = Request::new(message);
        if let Some(signer) = &self.signer {
            signer.sign_stream(method)?.apply(request.metadata_mut())?;
        }
        Ok(request)
    }

    async fn ready(&self) -> Result<Grpc<Channel>, Status> {
        let mut inner = self.inner.clone();
        inner
            .ready()
            .await
            .map_err(|e| Status::unavailable(format!("service was not ready: {e}")))?;
        Ok(inner)
    }

    pub(crate) async fn unary<Req, Resp>(
        &self,
        request: Request<Req>,
        path: &'static str,
    ) -> Result<Response<Resp>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut inner = self.ready().await?;
        inner
            .unary(
                request,
                PathAndQuery::from_static(path),
                ProstCodec::<Req, Resp>::default(),
            )
            .await
    }

    pub(crate) async fn server_streaming<Req, Resp>(
        &self,
        request: Request<Req>,
        path: &'static str,
    ) -> Result<Response<Streaming<Resp>>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut inner = self.ready().await?;
        inner
            .server_streaming(
                request,
                PathAndQuery::from_static(path),
                ProstCodec::<Req, Resp>::default(),
            )
            .await
    }
}
