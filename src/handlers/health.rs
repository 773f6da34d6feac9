pub async fn handle_health() -> &'static str {
    "OK"
}
