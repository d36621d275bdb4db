use super::futex;
use core::{
    mem::{size_of, transmute},
    sync::atomic::{AtomicU32, AtomicUsize, Ordering},
    time::Duration,
};
use winapi::shared::minwindef::{BOOL, DWORD, LPVOID};
use winapi::um::libloaderapi::{GetModuleHandleA, GetProcAddress};
use winapi::um::synchapi::Sleep;
use winapi::um::winbase::INFINITE;

type WaitOnAddressFn = unsafe extern "system" fn(
    Address: LPVOID,
    CompareAddress: LPVOID,
    AddressSize: usize,
    dwMilliseconds: DWORD,
) -> BOOL;
type WakeByAddressSingleFn = unsafe extern "system" fn(Address: LPVOID);

pub struct OsFutex;

unsafe impl futex::Futex for OsFutex {
    fn wake(ptr: *const AtomicU32) {
        if let Backend::WaitOnAddress = get_backend() {
            unsafe {
                let wake_by_address_single: WakeByAddressSingleFn =
                    transmute(WAKE_BY_ADDRESS_SINGLE.load(Ordering::Relaxed));
                (wake_by_address_single)(ptr as LPVOID);
            }
        }
    }

    fn wait(ptr: *const AtomicU32, expected: u32, timeout: Option<Duration>) {
        unsafe {
            if (*ptr).load(Ordering::Acquire) != expected {
                return;
            }
            match get_backend() {
                Backend::WaitOnAddress => {
                    let wait_on_address: WaitOnAddressFn =
                        transmute(WAIT_ON_ADDRESS.load(Ordering::Relaxed));
                    let _ = (wait_on_address)(
                        ptr as LPVOID,
                        &expected as *const u32 as LPVOID,
                        size_of::<u32>(),
                        timeout_ms(timeout),
                    );
                }
                // Pre-Win8: no address waits, poll. Spurious returns are re-checked by the parker.
                Backend::Sleep => Sleep(1),
            }
        }
    }
}

pub type Parker = futex::FutexParker<OsFutex>;

fn timeout_ms(timeout: Option<Duration>) -> DWORD {
    match timeout {
        None => INFINITE,
        Some(timeout) => {
            // Round up so a short timeout never becomes a busy zero-millisecond wait.
            let ms = timeout.as_nanos().div_ceil(1_000_000);
            ms.min((INFINITE - 1) as u128) as DWORD
        }
    }
}

const BACKEND_UNINIT: usize = 0;
const BACKEND_WAIT_ON_ADDRESS: usize = 1;
const BACKEND_SLEEP: usize = 2;
static BACKEND: AtomicUsize = AtomicUsize::new(BACKEND_UNINIT);

enum Backend {
    WaitOnAddress,
    Sleep,
}

fn get_backend() -> Backend {
    match BACKEND.load(Ordering::Acquire) {
        BACKEND_WAIT_ON_ADDRESS => Backend::WaitOnAddress,
        BACKEND_SLEEP => Backend::Sleep,
        _ => unsafe {
            if load_wait_on_address() {
                BACKEND.store(BACKEND_WAIT_ON_ADDRESS, Ordering::Release);
                Backend::WaitOnAddress
            } else {
                BACKEND.store(BACKEND_SLEEP, Ordering::Release);
                Backend::Sleep
            }
        },
    }
}

static WAKE_BY_ADDRESS_SINGLE: AtomicUsize = AtomicUsize::new(0);
static WAIT_ON_ADDRESS: AtomicUsize = AtomicUsize::new(0);

unsafe fn load_wait_on_address() -> bool {
    let dll = GetModuleHandleA(b"api-ms-win-core-synch-l1-2-0.dll\0".as_ptr() as *const i8);
    if dll.is_null() {
        return false;
    }

    let wait = GetProcAddress(dll, b"WaitOnAddress\0".as_ptr() as *const i8);
    if wait.is_null() {
        return false;
    }

    let wake = GetProcAddress(dll, b"WakeByAddressSingle\0".as_ptr() as *const i8);
    if wake.is_null() {
        return false;
    }

    WAIT_ON_ADDRESS.store(wait as usize, Ordering::Relaxed);
    WAKE_BY_ADDRESS_SINGLE.store(wake as usize, Ordering::Relaxed);
    true
}
