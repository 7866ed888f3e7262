use axum::response::Html;

#[macro_export]
macro_rules! include_res {
    (bytes, $p:expr) => {
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
    (str, $p:expr) => {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
}

/// Page shown in the browser once the provider has redirected back.
pub(crate) fn signed_in(provider: &str) -> Html<String> {
    Html(
        include_res!(str, "/pages/lockin.html")
        .replace("{provider}", provider)
    )
}
