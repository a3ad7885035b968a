use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use super::service::FileServer;
use super::types::{DeleteResponse, NodeError, PeersResponse, StoreResponse};

pub async fn handle_store(
    Extension(server): Extension<Arc<FileServer>>,
    Path(key): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<StoreResponse>) {
    let mut reader: &[u8] = &body;

    match server.store(&key, &mut reader).await {
        Ok(size) => (StatusCode::OK, Json(StoreResponse { success: true, size })),
        Err(e) => {
            tracing::error!("Failed to store [{}]: {}", key, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StoreResponse {
                    success: false,
                    size: 0,
                }),
            )
        }
    }
}

pub async fn handle_get(
    Extension(server): Extension<Arc<FileServer>>,
    Path(key): Path<String>,
) -> (StatusCode, Vec<u8>) {
    let (size, mut file) = match server.get(&key).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("Failed to get [{}]: {}", key, e);
            return (status_for(&e), Vec::new());
        }
    };

    let mut contents = Vec::with_capacity(size as usize);
    match file.read_to_end(&mut contents).await {
        Ok(_) => (StatusCode::OK, contents),
        Err(e) => {
            tracing::error!("Failed to read [{}]: {}", key, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
        }
    }
}

pub async fn handle_delete(
    Extension(server): Extension<Arc<FileServer>>,
    Path(key): Path<String>,
) -> (StatusCode, Json<DeleteResponse>) {
    match server.delete(&key).await {
        Ok(()) => (StatusCode::OK, Json(DeleteResponse { success: true })),
        Err(e) => {
            tracing::warn!("Failed to delete [{}]: {}", key, e);
            (status_for(&e), Json(DeleteResponse { success: false }))
        }
    }
}

pub async fn handle_peers(Extension(server): Extension<Arc<FileServer>>) -> Json<PeersResponse> {
    let peers = server
        .registry()
        .identities()
        .await
        .into_iter()
        .map(|id| id.to_string())
        .collect();

    Json(PeersResponse {
        address: server.local_addr().map(|addr| addr.to_string()),
        peers,
    })
}

fn status_for(e: &NodeError) -> StatusCode {
    match e {
        _ if e.is_not_found() => StatusCode::NOT_FOUND,
        NodeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
