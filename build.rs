use std::{
    env, fs,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

const DEFAULT_AP_SSID: &str = "PicoChat";
const DEFAULT_AP_IP: &str = "192.168.4.1";
const DEFAULT_MAX_CONNECTIONS: &str = "5";
const MAX_CONNECTIONS_LIMIT: usize = 16;
const DHCP_POOL_OFFSET: u8 = 1;
const DHCP_POOL_SIZE: u8 = 16;

fn main() {
    let target = env::var("TARGET").unwrap();
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    // 1) Handle memory.x based on target
    if target.starts_with("thumbv8m") {
        // Pico 2 W: copy memory-pico2.x to OUT_DIR as memory.x
        copy_memory_x("memory-pico2.x", &out_dir);
        link_firmware(&["-Tlink.x", "-Tdefmt.x"]);
    } else if target.starts_with("thumbv6m") {
        // Pico W: copy memory-pico1w.x to OUT_DIR as memory.x
        copy_memory_x("memory-pico1w.x", &out_dir);
        link_firmware(&["-Tlink.x", "-Tlink-rp.x", "-Tdefmt.x"]);
    }

    // 2) Load optional env files
    let _ = dotenvy::from_filename(".env");
    load_home_env(".pico.env");
    load_home_env(".env");

    // 3) Access point settings, with fallbacks so the crate builds without .env
    let ap_ssid = env_or_default("CHAT_AP_SSID", DEFAULT_AP_SSID);
    let ap_password = env_or_default("CHAT_AP_PASSWORD", "");
    let ap_ip = env_or_default("CHAT_AP_IP", DEFAULT_AP_IP);
    let max_connections = env_or_default("CHAT_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS);

    assert!(
        !ap_ssid.is_empty() && ap_ssid.len() <= 32,
        "CHAT_AP_SSID must be 1..=32 bytes, got {ap_ssid:?}"
    );
    assert!(
        ap_password.is_empty() || (8..=63).contains(&ap_password.len()),
        "CHAT_AP_PASSWORD must be empty (open network) or 8..=63 characters"
    );
    let ap_ip: Ipv4Addr = ap_ip
        .parse()
        .unwrap_or_else(|_| panic!("CHAT_AP_IP is not an IPv4 address: {ap_ip:?}"));
    let [_, _, _, host] = ap_ip.octets();
    assert!(
        u16::from(host) + u16::from(DHCP_POOL_OFFSET) + u16::from(DHCP_POOL_SIZE) <= 255,
        "CHAT_AP_IP host octet {host} leaves no room for {DHCP_POOL_SIZE} DHCP leases below .255"
    );
    let max_connections: usize = max_connections
        .parse()
        .ok()
        .filter(|count| (1..=MAX_CONNECTIONS_LIMIT).contains(count))
        .unwrap_or_else(|| {
            panic!("CHAT_MAX_CONNECTIONS must be 1..={MAX_CONNECTIONS_LIMIT}, got {max_connections:?}")
        });

    // 4) Expose as compile-time constants
    println!("cargo:rustc-env=CHAT_AP_SSID={ap_ssid}");
    println!("cargo:rustc-env=CHAT_AP_PASSWORD={ap_password}");

    let [a, b, c, d] = ap_ip.octets();
    let generated = format!(
        "/// Address of the access point; every DNS answer points here.\n\
         pub const AP_IP: [u8; 4] = [{a}, {b}, {c}, {d}];\n\
         /// Ceiling on concurrently connected WebSocket clients.\n\
         pub const MAX_CONNECTIONS: usize = {max_connections};\n\
         /// First address handed out by the DHCP server is `AP_IP` + this offset.\n\
         pub const DHCP_POOL_OFFSET: u8 = {DHCP_POOL_OFFSET};\n\
         /// Leases the DHCP server tracks before it recycles the oldest.\n\
         pub const DHCP_POOL_SIZE: usize = {DHCP_POOL_SIZE};\n"
    );
    fs::write(out_dir.join("portal_config.rs"), generated).expect("Failed to write portal_config.rs");

    println!("cargo:rerun-if-env-changed=CHAT_AP_SSID");
    println!("cargo:rerun-if-env-changed=CHAT_AP_PASSWORD");
    println!("cargo:rerun-if-env-changed=CHAT_AP_IP");
    println!("cargo:rerun-if-env-changed=CHAT_MAX_CONNECTIONS");
    println!("cargo:rerun-if-changed=.env");
    println!("cargo:rerun-if-changed=build.rs");
}

fn copy_memory_x(file: &str, out_dir: &Path) {
    let memory_x = fs::read_to_string(file).unwrap_or_else(|_| panic!("Failed to read {file}"));
    fs::write(out_dir.join("memory.x"), memory_x).expect("Failed to write memory.x");
    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rerun-if-changed={file}");
}

// Only the firmware binary needs the cortex-m-rt / defmt linker scripts.
fn link_firmware(scripts: &[&str]) {
    println!("cargo:rustc-link-arg-bins=--nmagic");
    for script in scripts {
        println!("cargo:rustc-link-arg-bins={script}");
    }
}

fn load_home_env(file: &str) {
    let home = match env::var_os("USERPROFILE").or_else(|| env::var_os("HOME")) {
        Some(path) => PathBuf::from(path),
        None => return,
    };
    let path = home.join(file);
    let _ = dotenvy::from_path(&path);
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
