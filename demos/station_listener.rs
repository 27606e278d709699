use traintastic_kernel::interface::TransportConfig;
use traintastic_kernel::kernel::KernelEvent;
use traintastic_kernel::Interface;

#[tokio::main]
async fn main() {
    let mut interface = Interface::new("simulator", TransportConfig::Simulator);
    interface.set_online(true, true).await;

    interface.set_power_on(true).await;

    for _ in 0..8 {
        match interface.next_event().await {
            Some(KernelEvent::Started) => println!("kernel started"),
            Some(KernelEvent::GlobalPowerChanged(on)) => println!("global power: {on}"),
            Some(KernelEvent::Idle) => println!("idle"),
            Some(KernelEvent::DecoderThrottleReport { address, speed, .. }) => {
                println!("decoder {address} reported speed step {speed}");
            }
            Some(KernelEvent::Error(e)) => {
                println!("transport error: {e}");
                break;
            }
            Some(_) => {}
            None => break,
        }
    }

    interface.set_power_on(false).await;
}
