//! Linux raw CAN sockets
//!
//! Opens one `PF_CAN`/`SOCK_RAW`/`CAN_RAW` socket per configured endpoint,
//! installs the optional identifier and error filters, and binds it either
//! to a named interface or to all interfaces (index 0).
//!
//! Frames are read with `recvfrom` so that the source interface index is
//! known even on a socket bound to every interface.

use crate::bus::{BusEndpoint, InterfaceProbe, Reception};
use crate::config::{EndpointConfig, IdFilter};
use crate::types::{
    timestamp_from_timeval, CanFrame, RelayError, Result, Timestamp, CAN_MTU, IFNAMSIZ,
};
use std::ffi::{CStr, CString};
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

// <linux/can.h>, <linux/can/raw.h>, <linux/sockios.h>
const CAN_RAW: libc::c_int = 1;
const SOL_CAN_RAW: libc::c_int = 101;
const CAN_RAW_FILTER: libc::c_int = 1;
const CAN_RAW_ERR_FILTER: libc::c_int = 2;
const CAN_INV_FILTER: u32 = 0x2000_0000;
const SIOCGSTAMP: libc::c_ulong = 0x8906;
const SIOCGIFNAME: libc::c_ulong = 0x8910;

/// `struct sockaddr_can`
#[repr(C)]
struct SockaddrCan {
    can_family: libc::sa_family_t,
    can_ifindex: libc::c_int,
    // tp / j1939 address union
    can_addr: [u64; 2],
}

/// `struct can_filter`
#[repr(C)]
struct RawFilter {
    can_id: u32,
    can_mask: u32,
}

/// `struct ifreq`, restricted to the name/index members
#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_ifindex: libc::c_int,
    _pad: [u8; 20],
}

/// Raw CAN socket bound to one interface or to all of them
#[derive(Debug)]
pub struct RawCanSocket {
    fd: OwnedFd,
    label: String,
    bound_ifindex: u32,
}

impl RawCanSocket {
    /// Open, filter and bind a raw CAN socket for `endpoint`
    ///
    /// # Arguments
    /// * `endpoint` - Interface name plus optional filters
    ///
    /// # Returns
    /// * `Result<RawCanSocket>` - Bound socket, or a `Socket` error naming
    ///   the failed step
    pub fn open(endpoint: &EndpointConfig) -> Result<Self> {
        let raw = unsafe { libc::socket(libc::PF_CAN, libc::SOCK_RAW, CAN_RAW) };
        if raw < 0 {
            return Err(socket_error(&endpoint.name, "socket"));
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut socket = Self {
            fd,
            label: endpoint.name.clone(),
            bound_ifindex: 0,
        };

        if let Some(filter) = endpoint.filter.filter(IdFilter::is_active) {
            log::info!(
                "CAN ID filter for {} set to mask = {:08X}, value = {:08X}{}",
                endpoint.name,
                filter.mask,
                filter.value,
                if filter.inverse { " (inv_filter)" } else { "" }
            );
            socket.set_id_filter(&filter)?;
        }

        if let Some(mask) = endpoint.error_mask.filter(|m| *m != 0) {
            log::debug!("CAN error filter for {} set to {:08X}", endpoint.name, mask);
            socket.set_error_filter(mask)?;
        }

        let ifindex = if endpoint.is_any() {
            0
        } else {
            lookup_ifindex(&endpoint.name)?
        };
        socket.bind(ifindex)?;

        log::info!(
            "Opened raw CAN socket on '{}' (ifindex {})",
            endpoint.name,
            socket.bound_ifindex()
        );
        Ok(socket)
    }

    /// Kernel index this socket is bound to (0 = all interfaces)
    pub fn bound_ifindex(&self) -> u32 {
        self.bound_ifindex
    }

    fn set_id_filter(&mut self, filter: &IdFilter) -> Result<()> {
        let mut can_id = filter.value;
        if filter.inverse {
            can_id |= CAN_INV_FILTER;
        }
        let rfilter = RawFilter {
            can_id,
            can_mask: filter.mask,
        };
        self.set_option(CAN_RAW_FILTER, &rfilter, "CAN_RAW_FILTER")
    }

    fn set_error_filter(&mut self, mask: u32) -> Result<()> {
        self.set_option(CAN_RAW_ERR_FILTER, &mask, "CAN_RAW_ERR_FILTER")
    }

    fn set_option<T>(&mut self, option: libc::c_int, value: &T, name: &'static str) -> Result<()> {
        let status = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_CAN_RAW,
                option,
                value as *const T as *const libc::c_void,
                mem::size_of::<T>() as libc::socklen_t,
            )
        };
        if status < 0 {
            return Err(socket_error(&self.label, name));
        }
        Ok(())
    }

    fn bind(&mut self, ifindex: u32) -> Result<()> {
        let addr = SockaddrCan {
            can_family: libc::AF_CAN as libc::sa_family_t,
            can_ifindex: ifindex as libc::c_int,
            can_addr: [0; 2],
        };
        let status = unsafe {
            libc::bind(
                self.fd.as_raw_fd(),
                &addr as *const SockaddrCan as *const libc::sockaddr,
                mem::size_of::<SockaddrCan>() as libc::socklen_t,
            )
        };
        if status < 0 {
            return Err(socket_error(&self.label, "bind"));
        }
        self.bound_ifindex = ifindex;
        Ok(())
    }
}

impl AsRawFd for RawCanSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl InterfaceProbe for RawCanSocket {
    fn interface_name(&self, ifindex: u32) -> io::Result<String> {
        let mut ifr = IfReq {
            ifr_name: [0; IFNAMSIZ],
            ifr_ifindex: ifindex as libc::c_int,
            _pad: [0; 20],
        };
        let status = unsafe { libc::ioctl(self.fd.as_raw_fd(), SIOCGIFNAME as _, &mut ifr) };
        if status < 0 {
            return Err(io::Error::last_os_error());
        }
        // The kernel NUL-terminates names shorter than IFNAMSIZ
        ifr.ifr_name[IFNAMSIZ - 1] = 0;
        let name = unsafe { CStr::from_ptr(ifr.ifr_name.as_ptr()) };
        Ok(name.to_string_lossy().into_owned())
    }
}

impl BusEndpoint for RawCanSocket {
    fn label(&self) -> &str {
        &self.label
    }

    fn receive(&mut self) -> Result<Reception> {
        let mut buf = [0u8; CAN_MTU];

        loop {
            // SAFETY: all-zero is a valid sockaddr_can
            let mut addr: SockaddrCan = unsafe { mem::zeroed() };
            let mut addr_len = mem::size_of::<SockaddrCan>() as libc::socklen_t;

            let nbytes = unsafe {
                libc::recvfrom(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    CAN_MTU,
                    0,
                    &mut addr as *mut SockaddrCan as *mut libc::sockaddr,
                    &mut addr_len,
                )
            };

            if nbytes < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(RelayError::Receive {
                    interface: self.label.clone(),
                    source: err,
                });
            }

            let frame = CanFrame::from_wire(&buf[..nbytes as usize])?;
            return Ok(Reception {
                frame,
                ifindex: addr.can_ifindex as u32,
            });
        }
    }

    fn receive_timestamp(&self) -> io::Result<Timestamp> {
        let mut tv = libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        let status = unsafe { libc::ioctl(self.fd.as_raw_fd(), SIOCGSTAMP as _, &mut tv) };
        if status < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(timestamp_from_timeval(tv.tv_sec as i64, tv.tv_usec as i64))
    }
}

/// Resolve an interface name to its kernel index
fn lookup_ifindex(name: &str) -> Result<u32> {
    let cname = CString::new(name).map_err(|_| RelayError::UnknownInterface(name.to_string()))?;
    let ifindex = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if ifindex == 0 {
        return Err(socket_error(name, "SIOCGIFINDEX"));
    }
    Ok(ifindex)
}

fn socket_error(interface: &str, operation: &'static str) -> RelayError {
    RelayError::Socket {
        interface: interface.to_string(),
        operation,
        source: io::Error::last_os_error(),
    }
}
