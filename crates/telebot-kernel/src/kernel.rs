//! [`Kernel`] – owns the drivers, sequences boot and shutdown, routes
//! events.
//!
//! Boot order is strict: the socket server binds first (the only fatal boot
//! failure), then the I2C and GPIO buses come up, then every peripheral
//! driver initialises in parallel – degrading individually when its hardware
//! is absent. Cross-component wiring happens only after all initialisations
//! have settled, so no inbound command is ever served before the hardware is
//! ready.
//!
//! Shutdown consumes the kernel (it can only run once) and walks the
//! drivers in reverse order, each step independent so one failing driver
//! never blocks the rest.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use telebot_hal::{
    Driver, GpioBus, I2cBus, LedStripDriver, MotorCommand, MotorDriver, Pca9685, PowerMonitor,
    ServoCommand, ServoDriver, Speaker,
};
use telebot_transport::{ServerEvent, SocketServer};
use telebot_types::protocol::{ClientCommand, ServerMessage};
use telebot_types::{BotError, BotStatus};

use crate::config::Config;
use crate::input::{InputChange, InputCommand, InputManager};

pub struct Kernel {
    listen_addr: SocketAddr,
    events: mpsc::Receiver<ServerEvent>,
    broadcast: broadcast::Sender<ServerMessage>,
    server_task: JoinHandle<()>,
    motor_tx: mpsc::Sender<MotorCommand>,
    motor_task: JoinHandle<()>,
    servo_tx: mpsc::Sender<ServoCommand>,
    servo_task: JoinHandle<()>,
    input: InputManager,
    leds: LedStripDriver,
    power: PowerMonitor,
    speaker: Speaker,
    i2c: I2cBus,
    gpio: GpioBus,
    peer_id: Option<String>,
}

impl Kernel {
    /// Bring the whole stack up.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Transport`] when the socket server cannot bind;
    /// every other initialisation failure degrades the affected driver and
    /// boot continues.
    pub async fn boot(config: Config) -> Result<Self, BotError> {
        let (events_tx, events) = mpsc::channel(64);
        let server = SocketServer::bind(config.transport(), events_tx).await?;
        let listen_addr = server.local_addr();
        let broadcast = server.broadcaster();

        let mut i2c = I2cBus::new(config.i2c_bus);
        i2c.initialise().await;
        let mut gpio = GpioBus::new();
        gpio.initialise().await;

        let pwm = Pca9685::new(i2c.handle(), config.pwm_address, config.pwm_frequency_hz);
        pwm.initialise().await;

        let mut motor = MotorDriver::new(pwm.clone(), gpio.controller(), config.motor.clone());
        let mut servo = ServoDriver::new(pwm, config.servo.clone());
        let mut leds = LedStripDriver::new(config.leds.clone());
        let mut power = PowerMonitor::new(i2c.handle());
        let mut speaker = Speaker::new();

        tokio::join!(
            motor.initialise(),
            servo.initialise(),
            leds.initialise(),
            power.initialise(),
            speaker.initialise(),
        );

        // All drivers settled: wire the event flow and open for traffic.
        let server_task = tokio::spawn(server.run());
        let (motor_tx, motor_rx) = mpsc::channel(16);
        let motor_task = tokio::spawn(motor.run(motor_rx));
        let (servo_tx, servo_rx) = mpsc::channel(16);
        let servo_task = tokio::spawn(servo.run(servo_rx));

        info!("kernel initialised, listening on {listen_addr}");
        Ok(Self {
            listen_addr,
            events,
            broadcast,
            server_task,
            motor_tx,
            motor_task,
            servo_tx,
            servo_task,
            input: InputManager::new(),
            leds,
            power,
            speaker,
            i2c,
            gpio,
            peer_id: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// The composite snapshot sent to clients: always derived fresh from
    /// current component state, never cached.
    pub fn status(&self) -> BotStatus {
        BotStatus {
            drive: self.input.drive(),
            pan_tilt: self.input.pan_tilt(),
            speed: self.input.speed(),
            power: self.power.status(),
        }
    }

    /// Serve events until a termination signal arrives or the transport
    /// goes away, then run the shutdown sequence.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("termination signal received");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.route(event).await,
                    None => break,
                }
            }
        }
        self.shut_down("shutdown signal").await;
    }

    /// The explicit routing switch between transport events and the rest of
    /// the system.
    async fn route(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ClientConnected { client, connected, .. } => {
                debug!("client {client} connected ({connected} total)");
                let _ = self.broadcast.send(ServerMessage::BotStatus(self.status()));
            }
            ServerEvent::ClientDisconnected { client, connected } => {
                debug!("client {client} disconnected ({connected} total)");
            }
            ServerEvent::Command { client, command } => {
                self.handle_command(client, command).await;
            }
        }
    }

    async fn handle_command(&mut self, client: Uuid, command: ClientCommand) {
        match command {
            ClientCommand::SetSpeed(value) => {
                self.apply_input(InputCommand::SetSpeed(value)).await;
            }
            ClientCommand::SetDriveInput(vector) => {
                self.apply_input(InputCommand::SetDriveInput(vector)).await;
            }
            ClientCommand::SetPanTiltInput(vector) => {
                self.apply_input(InputCommand::SetPanTiltInput(vector)).await;
            }
            ClientCommand::SetPeerId(peer_id) => {
                info!("client {client} registered peer id");
                self.peer_id = Some(peer_id);
            }
            ClientCommand::LedPower(on) => {
                self.leds.set_power(on).await;
            }
        }
    }

    /// Push a command through the input manager and route the resulting
    /// change (if any) to the drivers and back out to the clients.
    async fn apply_input(&mut self, command: InputCommand) {
        let Some(change) = self.input.handle(command) else {
            return;
        };
        match change {
            InputChange::Drive(drive) => {
                let _ = self.motor_tx.send(MotorCommand::SetDriveInput(drive)).await;
                let _ = self.broadcast.send(ServerMessage::DriveInputStatus { drive });
            }
            InputChange::Speed(speed) => {
                let _ = self.motor_tx.send(MotorCommand::SetSpeed(speed)).await;
                let _ = self.broadcast.send(ServerMessage::SpeedInputStatus { speed });
            }
            InputChange::PanTilt(pan_tilt) => {
                let _ = self
                    .servo_tx
                    .send(ServoCommand::SetPanTiltInput(pan_tilt))
                    .await;
                let _ = self
                    .broadcast
                    .send(ServerMessage::PanTiltInputStatus { pan_tilt });
            }
        }
        let _ = self.broadcast.send(ServerMessage::BotStatus(self.status()));
    }

    /// Reverse-order shutdown. Consuming the kernel guarantees the sequence
    /// runs at most once.
    pub async fn shut_down(mut self, reason: &str) {
        info!("shutting down: {reason}");
        let _ = self.broadcast.send(ServerMessage::EventShutDown {
            reason: reason.to_string(),
        });
        // Let connection tasks flush the shutdown frame before the listener
        // goes away.
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.server_task.abort();
        let _ = self.server_task.await;

        if self.motor_tx.send(MotorCommand::ShutDown).await.is_err() {
            warn!("motor task already stopped");
        }
        if let Err(e) = self.motor_task.await {
            warn!("motor task did not shut down cleanly: {e}");
        }
        if self.servo_tx.send(ServoCommand::ShutDown).await.is_err() {
            warn!("servo task already stopped");
        }
        if let Err(e) = self.servo_task.await {
            warn!("servo task did not shut down cleanly: {e}");
        }

        let peripherals: [&mut dyn Driver; 5] = [
            &mut self.leds,
            &mut self.speaker,
            &mut self.power,
            &mut self.i2c,
            &mut self.gpio,
        ];
        for driver in peripherals {
            driver.shut_down().await;
        }
        info!("kernel shut down");
    }
}
