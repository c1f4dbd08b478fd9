//! ESP-IDF platform helpers for the TLS broker link.
//!
//! Compiled only for `target_os = "espidf"`: an mbedTLS client session on
//! top of a connected lwIP socket, verified against the ESP-IDF CA
//! certificate bundle.
//!
//! The socket stays non-blocking for the whole session; bounded waits are
//! implemented by polling with a one-tick yield in between.

use std::ffi::CString;
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use log::{info, warn};

use esp_idf_svc::sys::{
    EAGAIN, MBEDTLS_ERR_SSL_PEER_CLOSE_NOTIFY, MBEDTLS_ERR_SSL_WANT_READ, MBEDTLS_ERR_SSL_WANT_WRITE,
    MBEDTLS_SSL_IS_CLIENT, MBEDTLS_SSL_PRESET_DEFAULT, MBEDTLS_SSL_TRANSPORT_STREAM,
    MBEDTLS_SSL_VERIFY_REQUIRED, esp_crt_bundle_attach, lwip_recv, lwip_send,
    mbedtls_ctr_drbg_context, mbedtls_ctr_drbg_free, mbedtls_ctr_drbg_init, mbedtls_ctr_drbg_random,
    mbedtls_ctr_drbg_seed, mbedtls_entropy_context, mbedtls_entropy_free, mbedtls_entropy_func,
    mbedtls_entropy_init, mbedtls_ssl_close_notify, mbedtls_ssl_conf_authmode, mbedtls_ssl_conf_rng,
    mbedtls_ssl_config, mbedtls_ssl_config_defaults, mbedtls_ssl_config_free, mbedtls_ssl_config_init,
    mbedtls_ssl_context, mbedtls_ssl_free, mbedtls_ssl_handshake, mbedtls_ssl_init, mbedtls_ssl_read,
    mbedtls_ssl_set_bio, mbedtls_ssl_set_hostname, mbedtls_ssl_setup, mbedtls_ssl_write, vTaskDelay,
};

use crate::error::TransportError;
use crate::mqtt::transport::ReadMode;

/// Personalisation string for the DRBG seed.
const DRBG_LABEL: &[u8] = b"statusdeck-mqtt";

// ── BIO callbacks ─────────────────────────────────────────────────────────────
//
// mbedTLS calls these to move raw bytes over the socket.  The socket fd is
// passed as the `p_bio` context pointer.

/// # Safety
///
/// `ctx` must be a raw file descriptor cast to `*mut c_void`, valid for the
/// lifetime of the TLS session (guaranteed by `TlsLink::stream`).
unsafe extern "C" fn bio_send(ctx: *mut core::ffi::c_void, buf: *const u8, len: usize) -> core::ffi::c_int {
    let fd = ctx as core::ffi::c_int;
    let ret = unsafe { lwip_send(fd, buf as *const core::ffi::c_void, len, 0) } as core::ffi::c_int;
    if ret < 0 && last_errno() == EAGAIN as i32 {
        return MBEDTLS_ERR_SSL_WANT_WRITE;
    }
    ret
}

/// # Safety
///
/// Same invariants as `bio_send`.  EAGAIN maps to `MBEDTLS_ERR_SSL_WANT_READ`
/// so polling reads work on the non-blocking socket.
unsafe extern "C" fn bio_recv(ctx: *mut core::ffi::c_void, buf: *mut u8, len: usize) -> core::ffi::c_int {
    let fd = ctx as core::ffi::c_int;
    let ret = unsafe { lwip_recv(fd, buf as *mut core::ffi::c_void, len, 0) } as core::ffi::c_int;
    if ret < 0 && last_errno() == EAGAIN as i32 {
        return MBEDTLS_ERR_SSL_WANT_READ;
    }
    ret
}

fn last_errno() -> i32 {
    // SAFETY: __errno() returns the pointer to the current task's errno.
    unsafe { *esp_idf_svc::sys::__errno() }
}

fn yield_tick() {
    // SAFETY: vTaskDelay is safe to call from any task context.
    unsafe { vTaskDelay(1) };
}

// ── Session ───────────────────────────────────────────────────────────────────

/// mbedTLS client session plus the socket it runs on.
///
/// All mbedTLS structs are boxed: they are large and must not move while
/// the session references them.
pub struct TlsLink {
    ssl: Box<mbedtls_ssl_context>,
    conf: Box<mbedtls_ssl_config>,
    entropy: Box<mbedtls_entropy_context>,
    drbg: Box<mbedtls_ctr_drbg_context>,
    /// Closed on drop, after the TLS context is freed.
    stream: TcpStream,
    mode: ReadMode,
    write_timeout: Duration,
}

impl Drop for TlsLink {
    fn drop(&mut self) {
        // SAFETY: every context was initialised in `handshake` and is freed
        // exactly once here; `stream` closes the fd afterwards.
        unsafe {
            mbedtls_ssl_close_notify(self.ssl.as_mut());
            mbedtls_ssl_free(self.ssl.as_mut());
            mbedtls_ssl_config_free(self.conf.as_mut());
            mbedtls_ctr_drbg_free(self.drbg.as_mut());
            mbedtls_entropy_free(self.entropy.as_mut());
        }
    }
}

impl TlsLink {
    /// Wrap a connected socket and run the TLS handshake within `timeout`.
    pub(super) fn handshake(stream: TcpStream, host: &str, timeout: Duration) -> Result<Self, TransportError> {
        stream.set_nonblocking(true).map_err(|_| TransportError::Io)?;
        let hostname = CString::new(host).map_err(|_| TransportError::Resolve)?;

        let mut link = Self {
            ssl: Box::new(mbedtls_ssl_context::default()),
            conf: Box::new(mbedtls_ssl_config::default()),
            entropy: Box::new(mbedtls_entropy_context::default()),
            drbg: Box::new(mbedtls_ctr_drbg_context::default()),
            stream,
            mode: ReadMode::NonBlocking,
            write_timeout: timeout,
        };
        let fd = link.stream.as_raw_fd();

        // SAFETY: all pointers come from Box::as_mut() and are valid, aligned
        // and exclusively owned; the call sequence follows ssl.h/ctr_drbg.h.
        unsafe {
            mbedtls_entropy_init(link.entropy.as_mut());
            mbedtls_ctr_drbg_init(link.drbg.as_mut());
            mbedtls_ssl_config_init(link.conf.as_mut());
            mbedtls_ssl_init(link.ssl.as_mut());

            let rc = mbedtls_ctr_drbg_seed(
                link.drbg.as_mut(),
                Some(mbedtls_entropy_func),
                link.entropy.as_mut() as *mut _ as *mut core::ffi::c_void,
                DRBG_LABEL.as_ptr(),
                DRBG_LABEL.len(),
            );
            if rc != 0 {
                warn!("TLS(espidf): ctr_drbg_seed failed (rc={})", rc);
                return Err(TransportError::Tls);
            }

            let rc = mbedtls_ssl_config_defaults(
                link.conf.as_mut(),
                MBEDTLS_SSL_IS_CLIENT as _,
                MBEDTLS_SSL_TRANSPORT_STREAM as _,
                MBEDTLS_SSL_PRESET_DEFAULT as _,
            );
            if rc != 0 {
                warn!("TLS(espidf): ssl_config_defaults failed (rc={})", rc);
                return Err(TransportError::Tls);
            }

            mbedtls_ssl_conf_authmode(link.conf.as_mut(), MBEDTLS_SSL_VERIFY_REQUIRED as _);
            let rc = esp_crt_bundle_attach(link.conf.as_mut() as *mut _ as *mut core::ffi::c_void);
            if rc != 0 {
                warn!("TLS(espidf): certificate bundle attach failed ({})", rc);
                return Err(TransportError::Tls);
            }
            mbedtls_ssl_conf_rng(
                link.conf.as_mut(),
                Some(mbedtls_ctr_drbg_random),
                link.drbg.as_mut() as *mut _ as *mut core::ffi::c_void,
            );

            let rc = mbedtls_ssl_setup(link.ssl.as_mut(), link.conf.as_ref());
            if rc != 0 {
                warn!("TLS(espidf): ssl_setup failed (rc={})", rc);
                return Err(TransportError::Tls);
            }
            let rc = mbedtls_ssl_set_hostname(link.ssl.as_mut(), hostname.as_ptr());
            if rc != 0 {
                warn!("TLS(espidf): set_hostname failed (rc={})", rc);
                return Err(TransportError::Tls);
            }
            mbedtls_ssl_set_bio(
                link.ssl.as_mut(),
                fd as usize as *mut core::ffi::c_void,
                Some(bio_send),
                Some(bio_recv),
                None,
            );
        }

        let deadline = Instant::now() + timeout;
        loop {
            // SAFETY: ssl is set up, BIO callbacks registered, conf outlives ssl.
            let rc = unsafe { mbedtls_ssl_handshake(link.ssl.as_mut()) };
            if rc == 0 {
                break;
            }
            if rc != MBEDTLS_ERR_SSL_WANT_READ && rc != MBEDTLS_ERR_SSL_WANT_WRITE {
                warn!("TLS(espidf): handshake failed (rc={})", rc);
                return Err(TransportError::Tls);
            }
            if Instant::now() >= deadline {
                warn!("TLS(espidf): handshake timed out");
                return Err(TransportError::Timeout);
            }
            yield_tick();
        }

        info!("TLS(espidf): handshake complete (fd={})", fd);
        Ok(link)
    }

    pub(super) fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let deadline = match self.mode {
            ReadMode::NonBlocking => None,
            ReadMode::Timeout(d) => Some(Instant::now() + d),
        };
        loop {
            // SAFETY: ssl is live for the lifetime of self; buf is a valid slice.
            let rc = unsafe { mbedtls_ssl_read(self.ssl.as_mut(), buf.as_mut_ptr(), buf.len()) };
            if rc > 0 {
                return Ok(rc as usize);
            }
            if rc == 0 || rc == MBEDTLS_ERR_SSL_PEER_CLOSE_NOTIFY {
                info!("TLS(espidf): peer closed the connection");
                return Err(TransportError::Closed);
            }
            if rc != MBEDTLS_ERR_SSL_WANT_READ && rc != MBEDTLS_ERR_SSL_WANT_WRITE {
                warn!("TLS(espidf): ssl_read error (rc={})", rc);
                return Err(TransportError::Tls);
            }
            match deadline {
                None => return Ok(0),
                Some(d) if Instant::now() >= d => return Err(TransportError::Timeout),
                Some(_) => yield_tick(),
            }
        }
    }

    pub(super) fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.write_timeout;
        let mut sent = 0;
        while sent < data.len() {
            let rest = &data[sent..];
            // SAFETY: ssl is live; rest is a valid slice.
            let rc = unsafe { mbedtls_ssl_write(self.ssl.as_mut(), rest.as_ptr(), rest.len()) };
            if rc > 0 {
                sent += rc as usize;
                continue;
            }
            if rc != MBEDTLS_ERR_SSL_WANT_WRITE && rc != MBEDTLS_ERR_SSL_WANT_READ {
                warn!("TLS(espidf): ssl_write error (rc={})", rc);
                return Err(TransportError::Tls);
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
            yield_tick();
        }
        Ok(())
    }

    pub(super) fn set_read_mode(&mut self, mode: ReadMode) -> Result<(), TransportError> {
        // The socket itself stays non-blocking; `read` polls up to the bound.
        self.mode = mode;
        Ok(())
    }
}
