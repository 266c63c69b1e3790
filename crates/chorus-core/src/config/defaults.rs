pub(super) fn default_true() -> bool {
    true
}
pub(super) fn default_name() -> String {
    "Chorus".to_string()
}
pub(super) fn default_data_dir() -> String {
    "~/.chorus".to_string()
}
pub(super) fn default_log_level() -> String {
    "info".to_string()
}
pub(super) fn default_db_path() -> String {
    "~/.chorus/data/chorus.db".to_string()
}
pub(super) fn default_history_limit() -> usize {
    100
}
pub(super) fn default_queue_capacity() -> usize {
    256
}
pub(super) fn default_max_attempts() -> u32 {
    3
}
pub(super) fn default_retry_backoff_ms() -> u64 {
    500
}
pub(super) fn default_queue_workers() -> usize {
    8
}
pub(super) fn default_poll_interval() -> u64 {
    600
}
pub(super) fn default_initiate_after() -> i64 {
    60
}
pub(super) fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
pub(super) fn default_api_port() -> u16 {
    3000
}
pub(super) fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
pub(super) fn default_openai_model() -> String {
    "gpt-4o".to_string()
}
pub(super) fn default_openai_image_model() -> String {
    "dall-e-3".to_string()
}
pub(super) fn default_image_size() -> String {
    "1024x1024".to_string()
}
pub(super) fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}
pub(super) fn default_seed_bots() -> usize {
    3
}
pub(super) fn default_outbound_buffer() -> usize {
    256
}
pub(super) fn default_write_wait() -> u64 {
    10
}
pub(super) fn default_pong_wait() -> u64 {
    60
}
pub(super) fn default_ping_interval() -> u64 {
    54
}
pub(super) fn default_max_message_bytes() -> usize {
    4096
}
