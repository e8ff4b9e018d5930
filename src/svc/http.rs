//! Management REST routes used by SDK bootstrap.

use crate::core::error::{CavernError, CavernResult};
use crate::hooks::{HttpContext, HttpHookManager, HttpNext};
use crate::servers::{HttpRequest, HttpResponse};
use crate::topology::{cluster_config, terse_bucket_config};
use serde_json::json;

const NOT_FOUND_BODY: &str = "Requested resource not found.\r\n";

pub(super) fn register(hooks: &HttpHookManager) -> CavernResult<()> {
    hooks
        .expect()
        .method("GET")
        .path("/pools")
        .handler(|_ctx, _req, _next| {
            let body = json!({
                "isAdmin": true,
                "isEnterprise": true,
                "implementationVersion": "7.0.0-0000-enterprise",
                "pools": [{"name": "default", "uri": "/pools/default"}],
            });
            HttpResponse::new(200).with_json_body(&body).ok()
        })?;

    hooks
        .expect()
        .method("GET")
        .path("/pools/default/nodeServices")
        .handler(|ctx, _req, _next| {
            let state = ctx.cluster().snapshot();
            Some(render(cluster_config(&state, ctx.node())))
        })?;

    for pattern in ["/pools/default/b/{bucket}", "/pools/default/buckets/{bucket}"] {
        hooks
            .expect()
            .method("GET")
            .path(pattern)
            .handler(handle_bucket_config)?;
    }

    Ok(())
}

fn handle_bucket_config(
    ctx: &HttpContext<'_>,
    _req: &HttpRequest,
    _next: HttpNext<'_>,
) -> Option<HttpResponse> {
    let bucket = ctx.param("bucket")?;
    let state = ctx.cluster().snapshot();
    Some(render(terse_bucket_config(&state, bucket, ctx.node())))
}

fn render(config: CavernResult<Vec<u8>>) -> HttpResponse {
    match config {
        Ok(body) => HttpResponse::json(200, body),
        Err(CavernError::BucketNotFound { .. }) => {
            HttpResponse::new(404).with_body(NOT_FOUND_BODY)
        }
        Err(e) => {
            tracing::warn!(error = %e, "config generation failed");
            HttpResponse::new(500).with_body(e.to_string())
        }
    }
}
