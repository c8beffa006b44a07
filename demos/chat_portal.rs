//! Captive-portal chat on a Pico W.
//!
//! Join the access point (default SSID `PicoChat`), and the phone's captive-portal browser
//! opens the chat page. Everyone on the network chats together, up to the configured limit.

#![no_std]
#![no_main]
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::convert::Infallible;

use chat_portal::http_server::{Page, StaticContent};
use chat_portal::{ChatPortal, ChatPortalStatic, RadioPins, Result, start_access_point};
use defmt::info;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_time::Timer;
use panic_probe as _;

const CHAT_PAGE: Page = Page::html("/", include_bytes!("chat.html"));

#[embassy_executor::main]
pub async fn main(spawner: Spawner) -> ! {
    // If it returns, something went wrong.
    let Err(err) = inner_main(spawner).await;
    core::panic!("{err}");
}

async fn inner_main(spawner: Spawner) -> Result<Infallible> {
    info!("Starting chat portal");
    let peripherals = embassy_rp::init(Default::default());

    let stack = start_access_point(
        RadioPins {
            pin_23: peripherals.PIN_23, // CYW43 power
            pin_24: peripherals.PIN_24, // CYW43 clock
            pin_25: peripherals.PIN_25, // CYW43 chip select
            pin_29: peripherals.PIN_29, // CYW43 data
            pio0: peripherals.PIO0,
            dma_ch0: peripherals.DMA_CH0,
        },
        spawner,
    )
    .await?;

    // Every path that is not a probe gets the chat page.
    static CONTENT: StaticContent = StaticContent::new(&[]).with_fallback(CHAT_PAGE);
    static CHAT_PORTAL_STATIC: ChatPortalStatic = ChatPortal::new_static();
    let chat_portal = ChatPortal::new(&CHAT_PORTAL_STATIC, stack, &CONTENT, spawner)?;

    let mut last_count = usize::MAX;
    loop {
        let count = chat_portal.user_count();
        if count != last_count {
            info!("{} users online", count);
            last_count = count;
        }
        Timer::after_secs(10).await;
    }
}
