//! GT911 capacitive touch controller on I2C.
//!
//! The controller raises its INT line when a new report is ready; the board
//! routes that edge to [`Gt911::on_interrupt`], which reads the first touch
//! point and hands it to the registered callback.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;
use log::{debug, info, warn};
use std::fmt;

pub const GT911_I2C_ADDR: u8 = 0x14;
pub const GT911_I2C_CLOCK_HZ: u32 = 400_000;

pub const GT_CTRL_REG: u16 = 0x8040;
pub const GT_CFGS_REG: u16 = 0x8047;
pub const GT_CHECK_REG: u16 = 0x80FF;
pub const GT_PID_REG: u16 = 0x8140;
pub const GT_GSTID_REG: u16 = 0x814E;
pub const GT_TP1_REG: u16 = 0x814F;

/// Buffer-status flag in the GSTID register
const STATUS_READY: u8 = 0x80;
const POINT_COUNT_MASK: u8 = 0x0F;

pub const TPD_MAX_FINGERS: u8 = 5;
pub const XSIZE: u16 = 480;
pub const YSIZE: u16 = 480;

/// Panel configuration written to `GT_CFGS_REG`
pub const GT911_CFG_TBL: [u8; 184] = [
    0x60, 0xE0, 0x01, 0xE0, 0x01, 0x05, 0x35, 0x00, 0x02, 0x08,
    0x1E, 0x08, 0x05, 0x3C, 0x0F, 0x05, 0x00, 0x00, 0xFF, 0x67,
    0x50, 0x00, 0x00, 0x18, 0x1A, 0x1E, 0x14, 0x89, 0x28, 0x0A,
    0x30, 0x2E, 0xBB, 0x0A, 0x03, 0x00, 0x00, 0x02, 0x33, 0x1D,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x32, 0x00, 0x00,
    0x2A, 0x1C, 0x5A, 0x94, 0xC5, 0x02, 0x07, 0x00, 0x00, 0x00,
    0xB5, 0x1F, 0x00, 0x90, 0x28, 0x00, 0x77, 0x32, 0x00, 0x62,
    0x3F, 0x00, 0x52, 0x50, 0x00, 0x52, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0F,
    0x0F, 0x03, 0x06, 0x10, 0x42, 0xF8, 0x0F, 0x14, 0x00, 0x00,
    0x00, 0x00, 0x1A, 0x18, 0x16, 0x14, 0x12, 0x10, 0x0E, 0x0C,
    0x0A, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x29, 0x28, 0x24, 0x22, 0x20, 0x1F, 0x1E, 0x1D,
    0x0E, 0x0C, 0x0A, 0x08, 0x06, 0x05, 0x04, 0x02, 0x00, 0xFF,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF,
];

/// Two's complement of the byte sum, so table + checksum sums to zero
pub fn config_checksum(table: &[u8]) -> u8 {
    table
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_neg()
}

#[derive(Debug)]
pub enum Gt911Error<I2cE, PinE> {
    I2c(I2cE),
    Pin(PinE),
}

impl<I2cE: fmt::Debug, PinE: fmt::Debug> fmt::Display for Gt911Error<I2cE, PinE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gt911Error::I2c(e) => write!(f, "GT911 I2C error: {:?}", e),
            Gt911Error::Pin(e) => write!(f, "GT911 pin error: {:?}", e),
        }
    }
}

impl<I2cE: fmt::Debug, PinE: fmt::Debug> std::error::Error for Gt911Error<I2cE, PinE> {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TouchState {
    #[default]
    Release,
    Press,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TouchData {
    pub state: TouchState,
    pub x: u16,
    pub y: u16,
}

pub type TouchCallback = Box<dyn FnMut(TouchData) + Send>;

/// Status byte plus the first point record (track id, x, y, size)
pub type RawPoint = [u8; 8];

pub struct Gt911<I2C, RST, D> {
    i2c: I2C,
    rst: RST,
    delay: D,
    address: u8,
    y_size: u16,
    last: (u16, u16),
    callback: Option<TouchCallback>,
}

impl<I2C, RST, D> Gt911<I2C, RST, D>
where
    I2C: I2c,
    RST: OutputPin,
    D: DelayNs,
{
    pub fn new(i2c: I2C, rst: RST, delay: D) -> Self {
        Self {
            i2c,
            rst,
            delay,
            address: GT911_I2C_ADDR,
            y_size: YSIZE,
            last: (0, 0),
            callback: None,
        }
    }

    /// Height used by the rotation in [`Gt911::report`]
    pub fn with_y_size(mut self, y_size: u16) -> Self {
        self.y_size = y_size;
        self
    }

    /// Reset into address 0x14 and log the product id.
    ///
    /// `int` is the controller's INT line driven as an output; the board
    /// turns it back into the interrupt input afterwards.
    pub fn init<INT: OutputPin<Error = RST::Error>>(
        &mut self,
        int: &mut INT,
    ) -> Result<[u8; 4], Gt911Error<I2C::Error, RST::Error>> {
        self.reset(int)?;
        let id = self.firmware_info()?;
        info!("GT911 ready at 0x{:02x}", self.address);
        Ok(id)
    }

    /// INT low while RST rises selects I2C address 0x14
    pub fn reset<INT: OutputPin<Error = RST::Error>>(
        &mut self,
        int: &mut INT,
    ) -> Result<(), Gt911Error<I2C::Error, RST::Error>> {
        int.set_low().map_err(Gt911Error::Pin)?;
        self.rst.set_low().map_err(Gt911Error::Pin)?;
        self.delay.delay_ms(10);
        int.set_high().map_err(Gt911Error::Pin)?;
        self.delay.delay_us(100);
        self.rst.set_high().map_err(Gt911Error::Pin)?;
        self.delay.delay_ms(5);
        int.set_low().map_err(Gt911Error::Pin)?;
        self.delay.delay_ms(50);
        Ok(())
    }

    pub fn firmware_info(&mut self) -> Result<[u8; 4], Gt911Error<I2C::Error, RST::Error>> {
        let mut id = [0u8; 4];
        self.read_reg(GT_PID_REG, &mut id)?;
        info!("CTP ID:{:x} {:x} {:x} {:x}", id[0], id[1], id[2], id[3]);
        Ok(id)
    }

    /// Write the configuration table and its checksum with `mode`
    pub fn send_config(&mut self, mode: u8) -> Result<(), Gt911Error<I2C::Error, RST::Error>> {
        let check = [config_checksum(&GT911_CFG_TBL), mode];
        self.write_reg(GT_CFGS_REG, &GT911_CFG_TBL)?;
        self.write_reg(GT_CHECK_REG, &check)?;
        Ok(())
    }

    pub fn read_reg(&mut self, reg: u16, buf: &mut [u8]) -> Result<(), Gt911Error<I2C::Error, RST::Error>> {
        self.i2c
            .write_read(self.address, &reg.to_be_bytes(), buf)
            .map_err(Gt911Error::I2c)
    }

    pub fn write_reg(&mut self, reg: u16, data: &[u8]) -> Result<(), Gt911Error<I2C::Error, RST::Error>> {
        let mut frame = Vec::with_capacity(data.len() + 2);
        frame.extend_from_slice(&reg.to_be_bytes());
        frame.extend_from_slice(data);
        self.i2c.write(self.address, &frame).map_err(Gt911Error::I2c)
    }

    /// Fetch the first touch point if the controller has a fresh report.
    /// Clears the buffer-status flag so the controller can post the next one.
    pub fn read_point(&mut self) -> Result<Option<RawPoint>, Gt911Error<I2C::Error, RST::Error>> {
        let mut mode = [0u8; 1];
        self.read_reg(GT_GSTID_REG, &mut mode)?;
        debug!("mode: {:x}", mode[0]);

        if mode[0] & STATUS_READY == 0 {
            return Ok(None);
        }
        self.write_reg(GT_GSTID_REG, &[0])?;

        let points = mode[0] & POINT_COUNT_MASK;
        if points == 0 {
            return Ok(None);
        }
        if points > TPD_MAX_FINGERS {
            warn!("GT911 reports {} points", points);
        }

        let mut raw = [0u8; 8];
        raw[0] = mode[0];
        self.read_reg(GT_TP1_REG, &mut raw[1..])?;
        self.write_reg(GT_GSTID_REG, &[0])?;
        Ok(Some(raw))
    }

    /// Current touch state. A press is rotated into display coordinates and
    /// remembered; anything else reports a release at the last press.
    pub fn report(&mut self) -> TouchData {
        match self.read_point() {
            Ok(Some(raw)) => {
                let x = u16::from_le_bytes([raw[2], raw[3]]);
                let y = u16::from_le_bytes([raw[4], raw[5]]);
                self.last = transform_point(x, y, self.y_size);
                debug!("(x, y) = ({}, {})", self.last.0, self.last.1);
                TouchData {
                    state: TouchState::Press,
                    x: self.last.0,
                    y: self.last.1,
                }
            }
            Ok(None) => self.release(),
            Err(e) => {
                warn!("GT911 read failed: {}", e);
                self.release()
            }
        }
    }

    pub fn register_callback(&mut self, callback: impl FnMut(TouchData) + Send + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// INT edge handler
    pub fn on_interrupt(&mut self) -> TouchData {
        let data = self.report();
        if let Some(callback) = self.callback.as_mut() {
            callback(data);
        }
        data
    }

    pub fn release_bus(self) -> (I2C, RST, D) {
        (self.i2c, self.rst, self.delay)
    }

    fn release(&self) -> TouchData {
        TouchData {
            state: TouchState::Release,
            x: self.last.0,
            y: self.last.1,
        }
    }
}

/// Sensor axes to display axes: 90 degree rotation
pub fn transform_point(x: u16, y: u16, y_size: u16) -> (u16, u16) {
    (y_size.wrapping_sub(y), x)
}
