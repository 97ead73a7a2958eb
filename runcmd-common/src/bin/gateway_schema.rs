// ABOUTME: emits the json schema of the inbound and outbound message unions to stdout.
// ABOUTME: intended for generating typed bindings on the renderer side.

fn main() {
    let schema = serde_json::json!({
        "inbound": schemars::schema_for!(runcmd_common::InboundMessage),
        "outbound": schemars::schema_for!(runcmd_common::OutboundEvent),
    });
    let json = serde_json::to_string_pretty(&schema).expect("serialize schema");
    println!("{json}");
}
