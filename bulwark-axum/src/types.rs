use bulwark::RequestContext;

/// Caller information for the current request.
///
/// Built per request by its extractor and dropped with the request, so one
/// caller's address can never be observed while serving another.
#[derive(Debug, Clone)]
pub struct ConnectionInfo(pub RequestContext);

impl ConnectionInfo {
    pub fn context(&self) -> &RequestContext {
        &self.0
    }

    pub fn into_context(self) -> RequestContext {
        self.0
    }
}

/// Authenticated principal for the request.
///
/// Insert it into the request extensions from your authentication middleware
/// and [`ConnectionInfo`] attaches it to the [`RequestContext`], so that
/// violations and unauthorized access are attributed to the caller.
#[derive(Debug, Clone)]
pub struct Principal(pub String);
