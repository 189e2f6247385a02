//! Operator input: key bindings and camera PTZ command templates.

use std::collections::HashMap;

use crate::error::{Result, WallError};
use crate::protocol::{Method, RtspRequest};

/// Something the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SetView(usize),
    NextView,
    PrevView,
    Quit,
    /// Send PTZ command `op` to `camera`.
    Ptz {
        camera: String,
        op: String,
        args: PtzArgs,
    },
}

/// Values substituted into a PTZ template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PtzArgs {
    pub speed: i64,
    pub preset: i64,
    pub pan: i64,
    pub tilt: i64,
    pub zoom: i64,
}

impl PtzArgs {
    fn value(&self, placeholder: &str) -> Option<i64> {
        match placeholder {
            "speed" => Some(self.speed),
            "preset" => Some(self.preset),
            "pan" => Some(self.pan),
            "tilt" => Some(self.tilt),
            "zoom" => Some(self.zoom),
            _ => None,
        }
    }
}

/// Key string to action.
#[derive(Debug, Clone, Default)]
pub struct KeyMap {
    bindings: HashMap<String, Action>,
}

impl KeyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// `1`..`9` select the first nine views, `n`/`p` step through them and
    /// `q` quits.
    pub fn with_defaults(view_count: usize) -> Self {
        let mut map = Self::new();
        for index in 0..view_count.min(9) {
            map.bind(&(index + 1).to_string(), Action::SetView(index));
        }
        map.bind("n", Action::NextView);
        map.bind("p", Action::PrevView);
        map.bind("q", Action::Quit);
        map
    }

    /// Bind `key`, replacing any earlier binding.
    pub fn bind(&mut self, key: &str, action: Action) {
        if let Some(previous) = self.bindings.insert(key.to_string(), action) {
            tracing::debug!(key, ?previous, "key binding replaced");
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&Action> {
        self.bindings.get(key)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// An HTTP request template for one PTZ operation of one camera.
///
/// `{speed}`, `{preset}`, `{pan}`, `{tilt}` and `{zoom}` in the URL and
/// body are replaced by [`PtzArgs`]; other braces are left as they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtzTemplate {
    pub url: String,
    pub method: Method,
    pub body: Option<String>,
}

impl PtzTemplate {
    pub fn new(url: &str, method: &str, body: Option<&str>) -> Result<Self> {
        let method = Method::http(method)
            .ok_or_else(|| WallError::Config(format!("unsupported PTZ method '{method}'")))?;
        Ok(Self {
            url: url.to_string(),
            method,
            body: body.map(str::to_string),
        })
    }

    pub fn expand(&self, args: &PtzArgs) -> RtspRequest {
        let request = RtspRequest::new(self.method, &substitute(&self.url, args));
        match &self.body {
            Some(body) => request.with_body(substitute(body, args)),
            None => request,
        }
    }
}

fn substitute(template: &str, args: &PtzArgs) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail.find('}') else {
            out.push_str(tail);
            return out;
        };
        let name = &tail[1..close];
        if name.contains('{') {
            // "{{speed}": keep the first brace, rescan from the next.
            out.push('{');
            rest = &tail[1..];
            continue;
        }
        match args.value(name) {
            Some(value) => out.push_str(&value.to_string()),
            None => out.push_str(&tail[..=close]),
        }
        rest = &tail[close + 1..];
    }

    out.push_str(rest);
    out
}
