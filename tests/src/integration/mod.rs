//! Integration flows across `mq-01-paging`, `mq-02-large-message` and the
//! broker runtime.

pub mod flows;
pub mod recovery;

#[cfg(test)]
pub(crate) mod fixtures {
    use broker_runtime::BrokerConfig;
    use mq_02_large_message::LargeMessageConfig;
    use std::path::Path;

    /// Runtime rooted in `dir` whose addresses page everything.
    pub fn paging_config(dir: &Path) -> BrokerConfig {
        let settings = dir.join("address-settings.json");
        std::fs::write(
            &settings,
            r#"{ "default": { "max_size_bytes": 0, "page_size_bytes": 8192, "full_policy": "PAGE" } }"#,
        )
        .unwrap();
        BrokerConfig {
            data_dir: dir.join("paging"),
            large_messages: LargeMessageConfig::default()
                .with_min_large_message_size(1024)
                .with_chunk_size(1024)
                .with_confirmation_window_size(4096),
            address_settings: Some(settings),
            ..BrokerConfig::default()
        }
    }

    pub fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }
}
