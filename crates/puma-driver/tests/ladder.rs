use can_transport::{CanBus, TxQueue};
use puma_driver::sim::SimBus;
use puma_driver::{
    api, ConfigurationState, ControlMode, Driver, Fixed16x16, Gains, MultiDriver, PumaConfig,
};

/// One caller-paced round: command, exchange frames, check, then send any read requests.
fn step(
    driver: &mut Driver,
    bus: &mut SimBus,
    queue: &TxQueue,
) -> anyhow::Result<Option<ConfigurationState>> {
    bus.advance(0.04);
    driver.configure_params();
    queue.flush(bus)?;
    while let Some(frame) = bus.try_recv()? {
        driver.process_message(&frame);
    }
    let entered = driver.verify_params();
    queue.flush(bus)?;
    Ok(entered)
}

fn configure(
    driver: &mut Driver,
    bus: &mut SimBus,
    queue: &TxQueue,
) -> anyhow::Result<Vec<ConfigurationState>> {
    let mut visited = Vec::new();
    for _ in 0..100 {
        if let Some(state) = step(driver, bus, queue)? {
            visited.push(state);
        }
        if driver.is_configured() {
            return Ok(visited);
        }
    }
    anyhow::bail!("ladder stuck in {}", driver.state())
}

#[test]
fn test_speed_mode_walks_every_state_in_order() -> anyhow::Result<()> {
    use ConfigurationState::*;
    let queue = TxQueue::new();
    let mut bus = SimBus::with_devices("sim0", [5])?;
    let mut driver = Driver::new(queue.clone(), 5, "left");
    driver.set_encoder_cpr(1024);
    driver.set_mode_with_gains(puma_driver::ControlMode::Speed, Gains::new(0.1, 0.01, 0.0));

    let visited = configure(&mut driver, &mut bus, &queue)?;
    assert_eq!(
        visited,
        vec![
            PowerFlag,
            EncoderPosRef,
            EncoderSpdRef,
            EncoderCounts,
            ClosedLoop,
            ControlMode,
            PGain,
            IGain,
            DGain,
            VerifiedParameters
        ]
    );
    assert_eq!(driver.state(), Configured);

    let sim = bus.controller(5).ok_or_else(|| anyhow::anyhow!("no sim"))?;
    assert_eq!(sim.mode(), Some(puma_driver::ControlMode::Speed));
    assert_eq!(sim.register(api::SPD_REF), Some(&[api::reference::QUAD_ENCODER][..]));
    assert_eq!(sim.register(api::CFG_ENC_LINES), Some(&1024u16.to_le_bytes()[..]));
    assert_eq!(
        sim.register(api::SPD_PC),
        Some(&Fixed16x16::from_f64(0.1).to_le_bytes()[..])
    );
    assert_eq!(sim.register(api::STATUS_POWER), Some(&[0u8][..]));
    Ok(())
}

#[test]
fn test_voltage_mode_skips_gain_states() -> anyhow::Result<()> {
    let queue = TxQueue::new();
    let mut bus = SimBus::with_devices("sim0", [5])?;
    let mut driver = Driver::new(queue.clone(), 5, "left");
    driver.set_mode(ControlMode::Voltage);

    let visited = configure(&mut driver, &mut bus, &queue)?;
    assert!(visited.ends_with(&[
        ConfigurationState::ControlMode,
        ConfigurationState::VerifiedParameters
    ]));
    assert!(!visited.contains(&ConfigurationState::PGain));
    assert_eq!(
        bus.controller(5).and_then(|c| c.mode()),
        Some(ControlMode::Voltage)
    );
    Ok(())
}

#[test]
fn test_frames_for_other_addresses_are_ignored() -> anyhow::Result<()> {
    let queue = TxQueue::new();
    let mut bus = SimBus::with_devices("sim0", [1, 2])?;
    let mut driver = Driver::new(queue.clone(), 1, "left");
    bus.advance(0.04);
    queue.enqueue(api::build_frame(api::STATUS_POWER, 2));
    queue.flush(&mut bus)?;
    let mut accepted = 0;
    let mut seen = 0;
    while let Some(frame) = bus.try_recv()? {
        seen += 1;
        if driver.process_message(&frame) {
            accepted += 1;
        }
    }
    // Two status bursts plus the reply addressed to device 2.
    assert_eq!(seen, 21);
    assert_eq!(accepted, 10);
    assert!(!driver.received_power());
    Ok(())
}

#[test]
fn test_gain_change_reverifies_only_gains() -> anyhow::Result<()> {
    let queue = TxQueue::new();
    let mut bus = SimBus::with_devices("sim0", [3])?;
    let mut driver = Driver::new(queue.clone(), 3, "arm");
    driver.set_mode_with_gains(ControlMode::Position, Gains::new(1.0, 0.0, 0.0));
    configure(&mut driver, &mut bus, &queue)?;

    driver.set_gains(Gains::new(2.5, 0.125, 0.0));
    assert_eq!(driver.state(), ConfigurationState::PGain);
    let visited = configure(&mut driver, &mut bus, &queue)?;
    assert_eq!(
        visited,
        vec![
            ConfigurationState::IGain,
            ConfigurationState::DGain,
            ConfigurationState::VerifiedParameters
        ]
    );
    assert_eq!(driver.reported_gain(puma_driver::GainTerm::P), Some(2.5));
    Ok(())
}

#[test]
fn test_power_cycle_while_running_reconfigures_everything() -> anyhow::Result<()> {
    let cfg = PumaConfig::from_yaml(
        "joints:\n  - { name: left, can_id: 1 }\n  - { name: right, can_id: 2, direction: -1 }\n",
    )?;
    let mut multi = MultiDriver::new(&cfg, TxQueue::new());
    let mut bus = SimBus::with_devices(&cfg.canbus_dev, [1, 2])?;

    let dt = cfg.period().as_secs_f64();
    let mut active = false;
    for _ in 0..100 {
        bus.advance(dt);
        if multi.run_once(&mut bus)?.became_active {
            active = true;
            break;
        }
    }
    assert!(active, "never became active");

    bus.controller_mut(2)
        .ok_or_else(|| anyhow::anyhow!("no sim"))?
        .power_cycle();

    let mut resets = Vec::new();
    let mut reactivated = false;
    for _ in 0..100 {
        bus.advance(dt);
        let report = multi.run_once(&mut bus)?;
        resets.extend(report.power_resets);
        if !resets.is_empty() && report.became_active {
            reactivated = true;
            break;
        }
    }
    assert_eq!(resets, vec![2]);
    assert!(reactivated);
    assert!(multi.drivers().iter().all(Driver::is_configured));
    Ok(())
}
