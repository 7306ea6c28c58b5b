//! A simulated display engine for tests and examples.
//!
//! [`FakeDevice`] models just enough register behavior for the sequencer
//! and the htotal calibration to run to completion against it: pipes report
//! that they're running when asked to run, vertical blanks arrive on running
//! pipes, and the CRC unit computes real checksums over whatever surface the
//! plane points at. Time is simulated and only advances when something
//! delays.
//!
//! All of the handles a device hands out share its state, so a test can
//! drive an [`Engine`](crate::Engine) through them and then inspect the
//! device to see what happened.

use crate::crc::{self, CRC_MASK};
use crate::interface::{Aperture, Interface};
use crate::models::Model;
use crate::plane::Depth;
use crate::platform::{Clock, PortDriver, Rect, Surface, Surfaces};
use crate::registers::Register;
use crate::sequencer::PIPESTAT_VBLANK;
use crate::timing::TimingDescriptor;
use crate::tuning::{CRC_ARM, CRC_READY};
use crate::{Pipe, PowerState};
use embedded_hal::blocking::delay::DelayUs;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::vec::Vec;

/// The first offset handed out by the simulated surface allocator.
pub const SURFACE_BASE: u32 = 0x0080_0000;

const SURFACE_ALIGN: u32 = 0x1000;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FakeError {
    /// The simulated renderer only handles 32bpp surfaces.
    UnsupportedFormat(Depth),
    UnknownSurface(u32),
}

/// One register write seen by the device.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Access {
    pub aperture: Aperture,
    pub offset: u32,
    pub value: u32,
}

/// One call into the simulated port driver.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PortCall {
    SetMode {
        width: u16,
        height: u16,
        pipe_mask: u32,
    },
    SetPower(PowerState),
    BridgeBringUp,
}

struct SurfaceMem {
    surface: Surface,
    pixels: Vec<u32>,
}

impl SurfaceMem {
    fn pitch(&self) -> usize {
        (self.surface.stride / 4) as usize
    }

    fn pixel(&self, x: u32, y: u32) -> u32 {
        let i = y as usize * self.pitch() + x as usize;
        self.pixels.get(i).copied().unwrap_or(0)
    }
}

struct State {
    pipe_enable: u32,
    pipe_state: u32,

    regs: HashMap<(Aperture, u32), u32>,
    writes: Vec<Access>,
    port_calls: Vec<PortCall>,
    now_us: u64,

    surfaces: Vec<SurfaceMem>,
    next_handle: u32,
    next_offset: u32,
    busy_polls: u32,
    pending_busy: u32,

    stuck_pipes: bool,
    vblank: bool,
    crc_good_htotal: Option<u16>,
    crc_never_matches: bool,
    crc_stalled: bool,
    crc_arms: u32,
    bridge: bool,
}

impl State {
    fn reg(&self, aperture: Aperture, offset: u32) -> u32 {
        self.regs.get(&(aperture, offset)).copied().unwrap_or(0)
    }

    fn pipe_reg(&self, aperture: Aperture, pipe: Pipe, reg: Register) -> u32 {
        self.reg(aperture, reg.offset_for(pipe))
    }

    fn pipe_running(&self, aperture: Aperture, pipe: Pipe) -> bool {
        let conf = self.pipe_reg(aperture, pipe, Register::PIPECONF);
        conf & self.pipe_state != 0
    }

    fn read(&mut self, aperture: Aperture, offset: u32) -> u32 {
        if let Some((Register::PIPESTAT, Some(pipe))) = Register::decode(offset) {
            if self.vblank && self.pipe_running(aperture, pipe) {
                let v = self.reg(aperture, offset) | PIPESTAT_VBLANK;
                self.regs.insert((aperture, offset), v);
            }
        }
        self.reg(aperture, offset)
    }

    fn write(&mut self, aperture: Aperture, offset: u32, v: u32) {
        self.writes.push(Access {
            aperture,
            offset,
            value: v,
        });
        let old = self.reg(aperture, offset);
        let stored = match Register::decode(offset) {
            Some((Register::PIPECONF, Some(_))) => {
                let running = if self.stuck_pipes {
                    old & self.pipe_state != 0
                } else {
                    v & self.pipe_enable != 0
                };
                if running {
                    v | self.pipe_state
                } else {
                    v & !self.pipe_state
                }
            }
            Some((Register::PIPESTAT, Some(_))) => old & !v,
            Some((Register::CRC_CTRL, Some(_))) if v & CRC_ARM != 0 && self.crc_stalled => {
                self.crc_arms += 1;
                v
            }
            Some((Register::CRC_CTRL, Some(pipe))) if v & CRC_ARM != 0 => {
                self.capture_crc(aperture, pipe);
                v | CRC_READY
            }
            _ => v,
        };
        self.regs.insert((aperture, offset), stored);
    }

    // Checksums what the pipe would scan out: the PIPESRC-sized region of
    // whatever the plane is pointing at.
    fn capture_crc(&mut self, aperture: Aperture, pipe: Pipe) {
        self.crc_arms += 1;
        let src = self.pipe_reg(aperture, pipe, Register::PIPESRC);
        let width = (src >> 16) + 1;
        let height = (src & 0xffff) + 1;
        let base = self.pipe_reg(aperture, pipe, Register::DSPSURF);
        let stride = self.pipe_reg(aperture, pipe, Register::DSPSTRIDE);

        let mem = self.surfaces.iter().find(|s| s.surface.offset == base);
        let mut acc = crc::Accumulator::new();
        for y in 0..height {
            for x in 0..width {
                let p = match mem {
                    Some(mem) if stride == mem.surface.stride => mem.pixel(x, y),
                    _ => 0,
                };
                acc.feed(p);
            }
        }
        let mut sum = acc.finish();

        let htotal = (self.pipe_reg(aperture, pipe, Register::HTOTAL) >> 16) as u16;
        let clipped = match self.crc_good_htotal {
            Some(good) => htotal != good,
            None => false,
        };
        if self.crc_never_matches || clipped {
            sum.red = (sum.red ^ 1) & CRC_MASK;
        }

        for (reg, v) in [
            (Register::CRC_RED, sum.red),
            (Register::CRC_GREEN, sum.green),
            (Register::CRC_BLUE, sum.blue),
        ]
        .iter()
        {
            self.regs.insert((aperture, reg.offset_for(pipe)), *v);
        }
    }

    fn surface_mut(&mut self, handle: u32) -> Result<&mut SurfaceMem, FakeError> {
        self.surfaces
            .iter_mut()
            .find(|s| s.surface.handle == handle)
            .ok_or(FakeError::UnknownSurface(handle))
    }
}

/// A simulated display engine. Cloning it produces another reference to
/// the same device.
#[derive(Clone)]
pub struct FakeDevice {
    state: Rc<RefCell<State>>,
}

impl FakeDevice {
    /// Creates a device with every register reading as zero, which leaves
    /// both pipes off and the VGA plane on.
    pub fn new<M: Model>(_model: M) -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                pipe_enable: M::PIPE_ENABLE,
                pipe_state: M::PIPE_STATE,
                regs: HashMap::new(),
                writes: Vec::new(),
                port_calls: Vec::new(),
                now_us: 0,
                surfaces: Vec::new(),
                next_handle: 1,
                next_offset: SURFACE_BASE,
                busy_polls: 0,
                pending_busy: 0,
                stuck_pipes: false,
                vblank: true,
                crc_good_htotal: None,
                crc_never_matches: false,
                crc_stalled: false,
                crc_arms: 0,
                bridge: false,
            })),
        }
    }

    pub fn interface(&self) -> FakeInterface {
        FakeInterface {
            state: self.state.clone(),
        }
    }

    pub fn clock(&self) -> FakeClock {
        FakeClock {
            state: self.state.clone(),
        }
    }

    pub fn surfaces(&self) -> FakeSurfaces {
        FakeSurfaces {
            state: self.state.clone(),
        }
    }

    pub fn port_driver(&self) -> FakePortDriver {
        FakePortDriver {
            state: self.state.clone(),
        }
    }

    /// Makes pipes ignore requests to start or stop running.
    pub fn set_stuck_pipes(&self, v: bool) {
        self.state.borrow_mut().stuck_pipes = v;
    }

    /// Controls whether running pipes report vertical blanks.
    pub fn set_vblank(&self, v: bool) {
        self.state.borrow_mut().vblank = v;
    }

    /// Makes the CRC unit see a clipped image unless the pipe's htotal
    /// field holds exactly the given value.
    pub fn set_crc_good_htotal(&self, v: Option<u16>) {
        self.state.borrow_mut().crc_good_htotal = v;
    }

    /// Makes the CRC unit always see a clipped image.
    pub fn set_crc_never_matches(&self, v: bool) {
        self.state.borrow_mut().crc_never_matches = v;
    }

    /// Makes the CRC unit accept captures but never report a result.
    pub fn set_crc_stalled(&self, v: bool) {
        self.state.borrow_mut().crc_stalled = v;
    }

    /// The number of times the renderer reports busy after each fill.
    pub fn set_render_busy_polls(&self, v: u32) {
        self.state.borrow_mut().busy_polls = v;
    }

    /// Gives the simulated port a bridge chip.
    pub fn set_bridge(&self, v: bool) {
        self.state.borrow_mut().bridge = v;
    }

    /// Reads a register without any side effects.
    pub fn reg(&self, aperture: Aperture, offset: u32) -> u32 {
        self.state.borrow().reg(aperture, offset)
    }

    /// Sets a register without logging a write or triggering any behavior.
    pub fn set_reg(&self, aperture: Aperture, offset: u32, v: u32) {
        self.state.borrow_mut().regs.insert((aperture, offset), v);
    }

    /// All register writes since creation or the last `take_writes`.
    pub fn writes(&self) -> Vec<Access> {
        self.state.borrow().writes.clone()
    }

    pub fn take_writes(&self) -> Vec<Access> {
        core::mem::take(&mut self.state.borrow_mut().writes)
    }

    pub fn port_calls(&self) -> Vec<PortCall> {
        self.state.borrow().port_calls.clone()
    }

    pub fn now_us(&self) -> u64 {
        self.state.borrow().now_us
    }

    /// The number of scratch surfaces allocated and not yet freed.
    pub fn live_surfaces(&self) -> usize {
        self.state.borrow().surfaces.len()
    }

    /// The number of CRC captures started.
    pub fn crc_arms(&self) -> u32 {
        self.state.borrow().crc_arms
    }
}

/// [`Interface`] handle for a [`FakeDevice`].
pub struct FakeInterface {
    state: Rc<RefCell<State>>,
}

impl Interface for FakeInterface {
    type Error = FakeError;

    fn read32(&mut self, aperture: Aperture, offset: u32) -> Result<u32, FakeError> {
        Ok(self.state.borrow_mut().read(aperture, offset))
    }

    fn write32(&mut self, aperture: Aperture, offset: u32, v: u32) -> Result<(), FakeError> {
        self.state.borrow_mut().write(aperture, offset, v);
        Ok(())
    }
}

/// [`Clock`] handle for a [`FakeDevice`]. Delays complete immediately,
/// advancing the device's time by the requested amount.
pub struct FakeClock {
    state: Rc<RefCell<State>>,
}

impl DelayUs<u32> for FakeClock {
    fn delay_us(&mut self, us: u32) {
        self.state.borrow_mut().now_us += us as u64;
    }
}

impl Clock for FakeClock {
    fn now_us(&mut self) -> u64 {
        self.state.borrow().now_us
    }
}

/// [`Surfaces`] handle for a [`FakeDevice`].
pub struct FakeSurfaces {
    state: Rc<RefCell<State>>,
}

impl Surfaces for FakeSurfaces {
    type Error = FakeError;

    fn alloc_scratch(
        &mut self,
        format: Depth,
        width: u32,
        height: u32,
    ) -> Result<Surface, FakeError> {
        if format != Depth::Bpp32 {
            return Err(FakeError::UnsupportedFormat(format));
        }
        let mut st = self.state.borrow_mut();
        let stride = (width * 4 + 63) & !63;
        let size = stride * height;
        let surface = Surface {
            handle: st.next_handle,
            offset: st.next_offset,
            stride,
            width,
            height,
            format,
        };
        st.next_handle += 1;
        st.next_offset += (size + SURFACE_ALIGN - 1) & !(SURFACE_ALIGN - 1);
        st.surfaces.push(SurfaceMem {
            surface,
            pixels: vec![0; (size / 4) as usize],
        });
        Ok(surface)
    }

    fn free(&mut self, surface: Surface) -> Result<(), FakeError> {
        let mut st = self.state.borrow_mut();
        let idx = st
            .surfaces
            .iter()
            .position(|s| s.surface.handle == surface.handle)
            .ok_or(FakeError::UnknownSurface(surface.handle))?;
        st.surfaces.remove(idx);
        Ok(())
    }

    fn draw_rect(&mut self, surface: &Surface, rect: Rect, color: u32) -> Result<(), FakeError> {
        let mut st = self.state.borrow_mut();
        st.pending_busy = st.busy_polls;
        let mem = st.surface_mut(surface.handle)?;
        let (w, h) = (mem.surface.width, mem.surface.height);
        let pitch = mem.pitch();
        let x_end = core::cmp::min(rect.x.saturating_add(rect.w), w);
        let y_end = core::cmp::min(rect.y.saturating_add(rect.h), h);
        for y in rect.y..y_end {
            for x in rect.x..x_end {
                mem.pixels[y as usize * pitch + x as usize] = color;
            }
        }
        Ok(())
    }

    fn is_idle(&mut self) -> Result<bool, FakeError> {
        let mut st = self.state.borrow_mut();
        if st.pending_busy > 0 {
            st.pending_busy -= 1;
            Ok(false)
        } else {
            Ok(true)
        }
    }

    fn read_pixels(
        &mut self,
        surface: &Surface,
        offset: u32,
        into: &mut [u32],
    ) -> Result<(), FakeError> {
        let mut st = self.state.borrow_mut();
        let mem = st.surface_mut(surface.handle)?;
        let w = mem.surface.width;
        for (i, out) in into.iter_mut().enumerate() {
            let n = offset + i as u32;
            *out = mem.pixel(n % w, n / w);
        }
        Ok(())
    }
}

/// [`PortDriver`] handle for a [`FakeDevice`], which logs its calls.
pub struct FakePortDriver {
    state: Rc<RefCell<State>>,
}

impl PortDriver for FakePortDriver {
    type Error = FakeError;

    fn set_mode(&mut self, timing: &TimingDescriptor, pipe_mask: u32) -> Result<(), FakeError> {
        self.state.borrow_mut().port_calls.push(PortCall::SetMode {
            width: timing.width,
            height: timing.height,
            pipe_mask,
        });
        Ok(())
    }

    fn set_power(&mut self, state: PowerState) -> Result<(), FakeError> {
        self.state
            .borrow_mut()
            .port_calls
            .push(PortCall::SetPower(state));
        Ok(())
    }

    fn has_bridge(&self) -> bool {
        self.state.borrow().bridge
    }

    fn bring_up_bridge(&mut self, _timing: &TimingDescriptor) -> Result<(), FakeError> {
        self.state
            .borrow_mut()
            .port_calls
            .push(PortCall::BridgeBringUp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plb::PLB;

    #[test]
    fn test_pipe_state_follows_enable() {
        let dev = FakeDevice::new(PLB);
        let mut ei = dev.interface();
        let conf = Register::PIPECONF.offset_for(Pipe::A);
        ei.write32(Aperture::Primary, conf, PLB::PIPE_ENABLE).unwrap();
        assert_eq!(
            ei.read32(Aperture::Primary, conf).unwrap(),
            PLB::PIPE_ENABLE | PLB::PIPE_STATE
        );
        // Only the window that was written.
        assert_eq!(ei.read32(Aperture::Secondary, conf).unwrap(), 0);

        dev.set_stuck_pipes(true);
        ei.write32(Aperture::Primary, conf, 0).unwrap();
        assert_eq!(
            ei.read32(Aperture::Primary, conf).unwrap(),
            PLB::PIPE_STATE
        );
    }

    #[test]
    fn test_vblank_write_one_to_clear() {
        let dev = FakeDevice::new(PLB);
        let mut ei = dev.interface();
        let stat = Register::PIPESTAT.offset_for(Pipe::B);
        dev.set_reg(Aperture::Primary, stat, PIPESTAT_VBLANK | 1);
        ei.write32(Aperture::Primary, stat, PIPESTAT_VBLANK).unwrap();
        // The pipe isn't running, so no new vblank arrives.
        assert_eq!(ei.read32(Aperture::Primary, stat).unwrap(), 1);

        dev.set_reg(
            Aperture::Primary,
            Register::PIPECONF.offset_for(Pipe::B),
            PLB::PIPE_STATE,
        );
        assert_eq!(
            ei.read32(Aperture::Primary, stat).unwrap(),
            PIPESTAT_VBLANK | 1
        );
    }

    #[test]
    fn test_surfaces() {
        let dev = FakeDevice::new(PLB);
        let mut s = dev.surfaces();
        let a = s.alloc_scratch(Depth::Bpp32, 10, 2).unwrap();
        let b = s.alloc_scratch(Depth::Bpp32, 10, 2).unwrap();
        assert_eq!(a.offset, SURFACE_BASE);
        assert_eq!(a.stride, 64);
        assert_eq!(b.offset, SURFACE_BASE + SURFACE_ALIGN);
        assert_eq!(
            s.alloc_scratch(Depth::Bpp16, 10, 2),
            Err(FakeError::UnsupportedFormat(Depth::Bpp16))
        );

        s.draw_rect(
            &a,
            Rect {
                x: 8,
                y: 1,
                w: 100,
                h: 100,
            },
            7,
        )
        .unwrap();
        let mut px = [0u32; 4];
        s.read_pixels(&a, 8, &mut px).unwrap();
        assert_eq!(px, [0, 0, 0, 0]);
        s.read_pixels(&a, 17, &mut px).unwrap();
        assert_eq!(px, [0, 7, 7, 0]);

        s.free(a).unwrap();
        assert_eq!(dev.live_surfaces(), 1);
        assert_eq!(s.free(a), Err(FakeError::UnknownSurface(a.handle)));
    }

    #[test]
    fn test_render_busy() {
        let dev = FakeDevice::new(PLB);
        dev.set_render_busy_polls(2);
        let mut s = dev.surfaces();
        let a = s.alloc_scratch(Depth::Bpp32, 4, 4).unwrap();
        assert!(s.is_idle().unwrap());
        s.draw_rect(&a, Rect { x: 0, y: 0, w: 1, h: 1 }, 1)
            .unwrap();
        assert!(!s.is_idle().unwrap());
        assert!(!s.is_idle().unwrap());
        assert!(s.is_idle().unwrap());
    }

    #[test]
    fn test_clock() {
        let dev = FakeDevice::new(PLB);
        let mut clock = dev.clock();
        clock.delay_us(250);
        clock.delay_us(50);
        assert_eq!(clock.now_us(), 300);
        assert_eq!(dev.now_us(), 300);
    }
}
