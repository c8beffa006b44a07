//! Bring up the CYW43 radio as a Wi-Fi access point with a static address.
//!
//! The access point is its own gateway and DNS server; the DHCP server started here hands
//! out addresses on the same `/24`.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use cyw43_pio::{DEFAULT_CLOCK_DIVIDER, PioSpi};
use defmt::info;
use embassy_executor::Spawner;
use embassy_net::{Config, Ipv4Address, Ipv4Cidr, Stack, StackResources, StaticConfigV4};
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::{DMA_CH0, PIN_23, PIN_24, PIN_25, PIN_29, PIO0};
use embassy_rp::pio::{InterruptHandler, Pio};
use embassy_rp::{Peri, bind_interrupts};
use static_cell::StaticCell;

use crate::dhcp_server::dhcp_server_task;
use crate::shared_constants::{
    AP_IP, AP_PASSWORD, AP_PREFIX_LEN, AP_SSID, HTTP_WORKERS, WEBSOCKET_WORKERS,
};
use crate::{Error, Result};

bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => InterruptHandler<PIO0>;
});

const AP_CHANNEL: u8 = 1;

/// Sockets the stack can hold: DNS, DHCP, the HTTP workers and the WebSocket workers.
const SOCKET_COUNT: usize = 2 + HTTP_WORKERS + WEBSOCKET_WORKERS;

/// The Pico W radio pins and the DMA channel its SPI bus uses.
pub struct RadioPins {
    pub pin_23: Peri<'static, PIN_23>,
    pub pin_24: Peri<'static, PIN_24>,
    pub pin_25: Peri<'static, PIN_25>,
    pub pin_29: Peri<'static, PIN_29>,
    pub pio0: Peri<'static, PIO0>,
    pub dma_ch0: Peri<'static, DMA_CH0>,
}

/// Start the radio in access-point mode and return the network stack once it is up.
///
/// Spawns the radio, network and DHCP tasks.
///
/// # Errors
/// Returns [`Error::TaskSpawn`] if any of those tasks cannot be spawned.
pub async fn start_access_point(
    pins: RadioPins,
    spawner: Spawner,
) -> Result<&'static Stack<'static>> {
    info!("Starting access point '{}'", AP_SSID);

    let fw = cyw43_firmware::CYW43_43439A0;
    let clm = cyw43_firmware::CYW43_43439A0_CLM;

    let pwr = Output::new(pins.pin_23, Level::Low);
    let cs = Output::new(pins.pin_25, Level::High);
    let mut pio = Pio::new(pins.pio0, Irqs);
    let spi = PioSpi::new(
        &mut pio.common,
        pio.sm0,
        DEFAULT_CLOCK_DIVIDER,
        pio.irq0,
        cs,
        pins.pin_24,
        pins.pin_29,
        pins.dma_ch0,
    );

    static STATE: StaticCell<cyw43::State> = StaticCell::new();
    let state = STATE.init(cyw43::State::new());
    let (net_device, mut control, runner) = cyw43::new(state, pwr, spi, fw).await;
    let wifi_token = wifi_task(runner).map_err(Error::TaskSpawn)?;
    spawner.spawn(wifi_token);

    control.init(clm).await;
    control
        .set_power_management(cyw43::PowerManagementMode::PowerSave)
        .await;

    let [a, b, c, d] = AP_IP;
    let ap_ip = Ipv4Address::new(a, b, c, d);
    let mut dns_servers = heapless::Vec::new();
    // Cannot fail: room for three.
    let _ = dns_servers.push(ap_ip);
    let config = Config::ipv4_static(StaticConfigV4 {
        address: Ipv4Cidr::new(ap_ip, AP_PREFIX_LEN),
        gateway: Some(ap_ip),
        dns_servers,
    });

    let seed = 0x0bad_cafe_dead_beef;

    static RESOURCES: StaticCell<StackResources<SOCKET_COUNT>> = StaticCell::new();
    static STACK: StaticCell<Stack<'static>> = StaticCell::new();
    let (stack, runner) = embassy_net::new(
        net_device,
        config,
        RESOURCES.init(StackResources::new()),
        seed,
    );
    let stack = STACK.init(stack);

    let net_token = net_task(runner).map_err(Error::TaskSpawn)?;
    spawner.spawn(net_token);

    if AP_PASSWORD.is_empty() {
        control.start_ap_open(AP_SSID, AP_CHANNEL).await;
    } else {
        control
            .start_ap_wpa2(AP_SSID, AP_PASSWORD, AP_CHANNEL)
            .await;
    }

    stack.wait_config_up().await;
    if let Some(config) = stack.config_v4() {
        info!("Access point address: {}", config.address);
    }

    let dhcp_token = dhcp_server_task(stack, ap_ip).map_err(Error::TaskSpawn)?;
    spawner.spawn(dhcp_token);

    info!("Access point ready - connect to '{}'", AP_SSID);
    Ok(stack)
}

#[embassy_executor::task]
async fn wifi_task(
    runner: cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>,
) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}
