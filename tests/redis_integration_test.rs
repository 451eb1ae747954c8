//! Redis 缓存客户端的集成测试
//!
//! 需要本地 Redis 实例，默认忽略

use sticky_relay::cache::{CacheClient, InterruptionSink, RedisConfig, SessionStore};

async fn test_client() -> CacheClient {
    let config = RedisConfig {
        database: 15,
        ..RedisConfig::default()
    };
    CacheClient::new(config).await.expect("连接 Redis 失败")
}

#[tokio::test]
#[ignore] // 需要 Redis 服务器运行
async fn test_ping_and_roundtrip() {
    let client = test_client().await;
    client.ping().await.expect("ping 失败");

    client
        .set_with_ttl("it:sticky:roundtrip", "value", 60)
        .await
        .expect("写入失败");

    let value = client
        .get_string("it:sticky:roundtrip")
        .await
        .expect("读取失败");
    assert_eq!(value.as_deref(), Some("value"));

    let ttl = client.ttl("it:sticky:roundtrip").await.expect("TTL 失败");
    assert!(ttl > 0 && ttl <= 60);
}

#[tokio::test]
#[ignore] // 需要 Redis 服务器运行
async fn test_scan_and_batch_fetch() {
    let client = test_client().await;

    for i in 0..5 {
        client
            .set_with_ttl(
                &format!("it:sticky:scan:{i}"),
                &format!(r#"{{"apiKeyId":"key-{i}"}}"#),
                60,
            )
            .await
            .expect("写入失败");
    }

    let mut cursor = 0u64;
    let mut all_keys = Vec::new();
    loop {
        let (next, keys) = client
            .scan_keys(cursor, "it:sticky:scan:*", 100)
            .await
            .expect("扫描失败");
        all_keys.extend(keys);
        cursor = next;
        if cursor == 0 {
            break;
        }
    }
    assert_eq!(all_keys.len(), 5);

    all_keys.push("it:sticky:scan:missing".to_string());
    let details = client.fetch_with_ttl(&all_keys).await.expect("批量读取失败");
    assert_eq!(details.len(), 6);

    // 存在的键带正 TTL，缺失的键是 (None, -2)
    let (value, ttl) = &details[0];
    assert!(value.is_some());
    assert!(*ttl > 0);
    let (missing_value, missing_ttl) = details.last().expect("结果为空");
    assert!(missing_value.is_none());
    assert_eq!(*missing_ttl, -2);
}

#[tokio::test]
#[ignore] // 需要 Redis 服务器运行
async fn test_interruption_counter_increments() {
    let client = test_client().await;

    client
        .record_stream_interruption("timeout", "it-provider")
        .await
        .expect("记录失败");
    client
        .record_stream_interruption("timeout", "it-provider")
        .await
        .expect("记录失败");
    client
        .record_stream_interruption("client_abort", "it-provider")
        .await
        .expect("记录失败");
}
