/*
 * http_integration.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Integration test against a real h2-capable server: verifies the full
 * cycle including TLS + ALPN negotiation, the connection preface, HPACK
 * with Huffman coding, and response delivery through the event loop.
 *
 * Run with:
 *   cargo test -p staffetta_core --test http_integration -- --ignored --nocapture
 */

use std::time::Duration;

use staffetta_core::Http2Client;

#[tokio::test]
#[ignore] // requires network
async fn get_over_h2() {
    let host = "nghttp2.org";
    let port = 443u16;

    println!("=== HTTP/2 Integration Test ===");
    println!("Connecting to {}:{}...", host, port);

    let mut client = Http2Client::new();
    client.connect(host, port).await.expect("connect failed");

    let result = client
        .get("/", true, Duration::from_secs(15))
        .await
        .expect("GET failed");

    println!("\n--- Response ---\n{}", result);

    assert!(result.contains(":status: 200"), "expected a 200 response");
    assert!(result.contains("<html"), "expected an HTML body");

    client.ping_once().await.expect("ping failed");

    let info = client.stream_info(true).await.expect("stream_info failed");
    println!("\n--- Streams ---\n{}", info);

    client.disconnect();
    println!("\n=== PASS ===");
}
