#![allow(dead_code)]

use std::sync::Arc;

use anyhow::anyhow;
use http::Method;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use signpost::{
    body::Body,
    container::{Instance, ServiceContainer},
    handler::{Arguments, Controller, ParamSpec},
    middleware::{Middleware, Next},
    responder::Reply,
    types::{Request, Response},
};

pub fn request(method: Method, uri: &str) -> Request {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_string(res: Response) -> String {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(res: Response) -> Value {
    serde_json::from_str(&body_string(res).await).unwrap()
}

pub struct Repo {
    pub users: Vec<(i64, &'static str)>,
}

/// Controller exposing the handler shapes used across the tests.
pub struct UserController;

#[async_trait::async_trait]
impl Controller for UserController {
    fn signature(&self, method: &str) -> Option<Vec<ParamSpec>> {
        match method {
            "show" => Some(vec![ParamSpec::int("id")]),
            "index" => Some(vec![
                ParamSpec::service("repo", "repo"),
                ParamSpec::fields("fields"),
                ParamSpec::int("page").with_default(1),
            ]),
            "me" => Some(vec![ParamSpec::request("req")]),
            "search" => Some(vec![ParamSpec::str("term"), ParamSpec::bool("exact")]),
            _ => None,
        }
    }

    async fn call(&self, method: &str, req: Request, args: Arguments) -> anyhow::Result<Reply> {
        match method {
            "show" => Ok(json!({ "id": args.int("id")? }).into()),
            "index" => {
                let repo = args.service::<Repo>("repo")?;
                let users: Vec<Value> = repo
                    .users
                    .iter()
                    .map(|(id, name)| json!({ "id": id, "name": name }))
                    .collect();
                let page = args.int("page")?;
                let selected = args.fields("fields")?.apply(Value::Array(users));
                Ok(json!({ "page": page, "users": selected }).into())
            }
            "me" => Ok(format!("me via {}", req.uri().path()).into()),
            "search" => Ok(json!({ "term": args.str("term")?, "exact": args.bool("exact")? }).into()),
            other => Err(anyhow!("no method {other}")),
        }
    }
}

/// Invokable controller.
pub struct Dashboard;

#[async_trait::async_trait]
impl Controller for Dashboard {
    fn signature(&self, method: &str) -> Option<Vec<ParamSpec>> {
        (method == signpost::handler::INVOKE).then(Vec::new)
    }

    async fn call(&self, _method: &str, _req: Request, _args: Arguments) -> anyhow::Result<Reply> {
        Ok("dashboard".into())
    }
}

pub type Log = Arc<Mutex<Vec<String>>>;

/// Records entry and exit of the chain under its own name.
pub struct Recorder {
    pub name: &'static str,
    pub log: Log,
}

#[async_trait::async_trait]
impl Middleware for Recorder {
    async fn handle(&self, req: Request, next: Next, params: &[String]) -> anyhow::Result<Response> {
        let suffix = if params.is_empty() {
            String::new()
        } else {
            format!("({})", params.join(","))
        };
        self.log.lock().push(format!("{}{suffix}:in", self.name));
        let res = next.run(req).await;
        self.log.lock().push(format!("{}:out", self.name));
        res
    }
}

/// Answers 403 without continuing the chain.
pub struct Deny;

#[async_trait::async_trait]
impl Middleware for Deny {
    async fn handle(&self, _req: Request, _next: Next, _params: &[String]) -> anyhow::Result<Response> {
        let mut res = Response::new(Body::from("denied"));
        *res.status_mut() = http::StatusCode::FORBIDDEN;
        Ok(res)
    }
}

pub fn container(log: &Log) -> Arc<ServiceContainer> {
    let container = ServiceContainer::new();
    container
        .bind("UserController", Instance::controller(UserController))
        .bind("Dashboard", Instance::controller(Dashboard))
        .bind(
            "repo",
            Instance::value(Repo {
                users: vec![(1, "ada"), (2, "linus")],
            }),
        )
        .bind("deny", Instance::middleware(Deny));
    for name in ["a", "b", "c", "role"] {
        container.bind(
            name,
            Instance::middleware(Recorder {
                name,
                log: log.clone(),
            }),
        );
    }
    Arc::new(container)
}
